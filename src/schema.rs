// Database schema definitions
diesel::table! {
    app_user (user_id) {
        user_id -> Int4,
        email -> Varchar,
        name -> Varchar,
        image -> Nullable<Text>,
        role -> Varchar,
        auth_method -> Varchar,
        provider_account_id -> Nullable<Varchar>,
        password_hash -> Nullable<Varchar>,
        email_verified_at -> Nullable<Timestamp>,
        email_verification_token -> Nullable<Varchar>,
        email_verification_expires -> Nullable<Timestamp>,
        reset_password_token -> Nullable<Varchar>,
        reset_password_expires -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    identity_account (account_id) {
        account_id -> Int4,
        provider -> Varchar,
        provider_account_id -> Varchar,
        email -> Varchar,
        created_at -> Timestamp,
    }
}

diesel::table! {
    login_token (token) {
        token -> Varchar,
        identifier -> Varchar,
        expires_at -> Timestamp,
    }
}

diesel::table! {
    booking (booking_id) {
        booking_id -> Int4,
        user_id -> Int4,
        item_id -> Varchar,
        item_name -> Varchar,
        item_kind -> Varchar,
        booking_date -> Date,
        booking_time -> Varchar,
        participants -> Int4,
        status -> Varchar,
        contact_email -> Varchar,
        contact_name -> Varchar,
        phone -> Nullable<Varchar>,
        notes -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    review (review_id) {
        review_id -> Int4,
        user_id -> Int4,
        item_id -> Varchar,
        item_kind -> Varchar,
        rating -> Int2,
        comment -> Varchar,
        user_name -> Varchar,
        user_email -> Varchar,
        approved -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::joinable!(booking -> app_user (user_id));
diesel::joinable!(review -> app_user (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    app_user, identity_account, login_token, booking, review,
);
