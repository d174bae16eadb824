diesel::table! {
    agents (id) {
        id -> Uuid,
        name -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tags (id) {
        id -> Uuid,
        name -> Varchar,
        color -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    canned_responses (id) {
        id -> Uuid,
        response -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    faq_auto_responses (id) {
        id -> Uuid,
        faq_auto_response -> Text,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (ticket_id) {
        ticket_id -> Uuid,
        marketplace -> Varchar,
        marketplace_conversation_id -> Varchar,
        customer_name -> Varchar,
        priority -> Varchar,
        ticket_status -> Varchar,
        assigned_to -> Nullable<Uuid>,
        conversation_start_date -> Timestamptz,
        last_updated_date -> Timestamptz,
        order_history -> Jsonb,
        related_listing_url -> Nullable<Varchar>,
    }
}

diesel::table! {
    messages (id) {
        id -> Int8,
        ticket_id -> Uuid,
        message -> Text,
        authored -> Bool,
        date -> Timestamptz,
        image_attachments -> Jsonb,
    }
}

diesel::table! {
    ticket_tags (ticket_id, tag_id) {
        ticket_id -> Uuid,
        tag_id -> Uuid,
    }
}

diesel::joinable!(tickets -> agents (assigned_to));
diesel::joinable!(messages -> tickets (ticket_id));
diesel::joinable!(ticket_tags -> tickets (ticket_id));
diesel::joinable!(ticket_tags -> tags (tag_id));

diesel::allow_tables_to_appear_in_same_query!(
    agents,
    tags,
    canned_responses,
    faq_auto_responses,
    tickets,
    messages,
    ticket_tags,
);
