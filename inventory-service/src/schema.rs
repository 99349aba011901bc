diesel::table! {
    inventory_reservations (reservation_id) {
        reservation_id -> Uuid,
        #[max_length = 128]
        product_id -> Varchar,
        #[max_length = 128]
        order_id -> Varchar,
        quantity -> Int4,
        #[max_length = 16]
        status -> Varchar,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    inventory_stock (product_id) {
        #[max_length = 128]
        product_id -> Varchar,
        available_quantity -> Int4,
        reserved_quantity -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(inventory_reservations -> inventory_stock (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    inventory_reservations,
    inventory_stock,
);
