mod economics;
mod health;
mod nodes;
mod payouts;
mod streams;


macros_utils::routes! {
    mod health,
    mod streams,
    mod nodes,
    mod payouts,
    scope "/api/v1" => mod economics,
}
