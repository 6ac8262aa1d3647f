//! Diesel table definitions matching the embedded migrations.

diesel::table! {
    bots (id) {
        id -> Text,
        name -> Text,
        exchange -> Text,
        network -> Text,
        symbol -> Text,
        base_asset -> Text,
        quote_asset -> Text,
        quantity_increment -> Text,
        base_order_size -> Text,
        max_safety_orders -> Integer,
        price_deviation -> Text,
        safety_order_size -> Text,
        safety_order_price_step -> Text,
        safety_order_volume_step -> Text,
        take_profit -> Text,
        status -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    deals (id) {
        id -> Text,
        bot_id -> Text,
        status -> Text,
        current_quantity -> Text,
        average_price -> Text,
        total_cost -> Text,
        current_profit -> Text,
        profit_percent -> Nullable<Text>,
        actual_safety_orders -> Integer,
        warning_message -> Nullable<Text>,
        started_at -> Text,
        completed_at -> Nullable<Text>,
    }
}

diesel::table! {
    orders (id) {
        id -> Text,
        deal_id -> Text,
        order_type -> Text,
        side -> Text,
        method -> Text,
        status -> Text,
        symbol -> Text,
        quantity -> Text,
        price -> Nullable<Text>,
        filled -> Text,
        remaining -> Text,
        cost -> Text,
        external_id -> Text,
        status_reason -> Nullable<Text>,
        filled_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(deals -> bots (bot_id));
diesel::joinable!(orders -> deals (deal_id));

diesel::allow_tables_to_appear_in_same_query!(bots, deals, orders);
