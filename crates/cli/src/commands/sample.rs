//! Random order generation.
//!
//! Generated orders always satisfy `Order::validate`: the payment
//! transaction equals the order key and item track numbers match the order.

use chrono::{Duration, SubsecRound, Utc};
use orderline_core::{DeliveryInfo, Item, Order, OrderUid, Payment};
use rand::Rng;
use rand::seq::IndexedRandom;

const NAMES: &[&str] = &["Test Testov", "Ivan Petrov", "Anna Smirnova", "Maria Ivanova"];
const CITIES: &[(&str, &str)] = &[
    ("Kiryat Mozkin", "Kraiot"),
    ("Moscow", "Moscow"),
    ("Kazan", "Tatarstan"),
    ("Novosibirsk", "Novosibirsk Oblast"),
];
const BRANDS: &[&str] = &["Vivienne Sabo", "Maybelline", "L'Oreal", "Nivea"];
const PRODUCTS: &[&str] = &["Mascaras", "Lipstick", "Face cream", "Shampoo"];
const SIZES: &[&str] = &["0", "S", "M", "L"];
const PROVIDERS: &[&str] = &["wbpay", "sbp", "card"];
const BANKS: &[&str] = &["alpha", "sber", "tinkoff"];
const SERVICES: &[&str] = &["meest", "cdek", "boxberry"];

/// Pick from a non-empty constant table.
fn pick<'a, R: Rng + ?Sized>(rng: &mut R, options: &'a [&'a str]) -> &'a str {
    options.choose(rng).copied().unwrap_or_default()
}

/// Build a random, valid order with `items` line items.
pub fn random_order<R: Rng + ?Sized>(rng: &mut R, items: usize) -> Order {
    let uid = uuid::Uuid::new_v4().simple().to_string();
    let track_number = format!("WBIL{}", rng.random_range(100_000..1_000_000));
    let (city, region) = CITIES.choose(rng).copied().unwrap_or(("Moscow", "Moscow"));

    let items: Vec<Item> = (0..items)
        .map(|_| {
            let price = rng.random_range(100..5_000);
            let sale = rng.random_range(0..50);
            Item {
                chrt_id: rng.random_range(1_000_000..10_000_000),
                track_number: track_number.clone(),
                price,
                rid: uuid::Uuid::new_v4().simple().to_string(),
                name: pick(rng, PRODUCTS).to_string(),
                sale,
                size: pick(rng, SIZES).to_string(),
                total_price: price * i64::from(100 - sale) / 100,
                nm_id: rng.random_range(1_000_000..10_000_000),
                brand: pick(rng, BRANDS).to_string(),
                status: 202,
            }
        })
        .collect();

    let goods_total: i64 = items.iter().map(|item| item.total_price).sum();
    let delivery_cost = rng.random_range(0..2_000);
    let created = (Utc::now() - Duration::minutes(rng.random_range(0..60 * 24 * 30))).trunc_subsecs(0);

    Order {
        order_uid: OrderUid::new(uid.clone()),
        track_number,
        entry: "WBIL".to_string(),
        delivery: DeliveryInfo {
            name: pick(rng, NAMES).to_string(),
            phone: format!("+7{}", rng.random_range(9_000_000_000_i64..10_000_000_000)),
            zip: rng.random_range(100_000..1_000_000).to_string(),
            city: city.to_string(),
            address: format!("Ploshad Mira {}", rng.random_range(1..100)),
            region: region.to_string(),
            email: format!("customer{}@example.com", rng.random_range(1..10_000)),
        },
        payment: Payment {
            transaction: uid,
            request_id: 0,
            currency: "RUB".to_string(),
            provider: pick(rng, PROVIDERS).to_string(),
            amount: goods_total + delivery_cost,
            payment_dt: created.timestamp(),
            bank: pick(rng, BANKS).to_string(),
            delivery_cost,
            goods_total,
            custom_fee: 0,
        },
        items,
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: format!("customer{}", rng.random_range(1..1_000)),
        delivery_service: pick(rng, SERVICES).to_string(),
        shardkey: rng.random_range(0..10).to_string(),
        sm_id: rng.random_range(1..100),
        date_created: created,
        oof_shard: rng.random_range(0..3).to_string(),
    }
}

/// Print one random order as pretty JSON.
///
/// # Errors
///
/// Returns an error if the order cannot be serialized.
pub fn run(items: usize) -> Result<(), serde_json::Error> {
    let order = random_order(&mut rand::rng(), items);
    let json = serde_json::to_string_pretty(&order)?;

    #[allow(clippy::print_stdout)]
    {
        println!("{json}");
    }
    Ok(())
}
