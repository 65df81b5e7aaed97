diesel::table! {
    idempotency_records (scope, key) {
        scope -> Varchar,
        key -> Varchar,
        recorded_at -> Timestamptz,
    }
}

diesel::table! {
    reservations (id) {
        id -> Uuid,
        public_id -> Varchar,
        service_type -> Varchar,
        status -> Varchar,
        slot_start -> Timestamptz,
        slot_end -> Timestamptz,
        after_hours -> Bool,
        payment_expires_at -> Nullable<Timestamptz>,
        pricing_snapshot -> Jsonb,
        total_amount -> Numeric,
        currency -> Varchar,
        payment_session_id -> Nullable<Varchar>,
        checkout_url -> Nullable<Text>,
        customer_name -> Varchar,
        customer_email -> Varchar,
        customer_phone -> Varchar,
        address -> Text,
        vehicle_plate -> Nullable<Varchar>,
        symptoms -> Nullable<Text>,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    idempotency_records,
    reservations,
);
