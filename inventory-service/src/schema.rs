diesel::table! {
    inventory_operations (id) {
        id -> Uuid,
        idempotency_key -> Varchar,
        operation_type -> Varchar,
        order_id -> Nullable<Varchar>,
        product_id -> Varchar,
        quantity -> Int4,
        status -> Varchar,
        error_code -> Nullable<Varchar>,
        error_message -> Nullable<Varchar>,
        correlation_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}
