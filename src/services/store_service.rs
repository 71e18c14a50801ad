// src/services/store_service.rs
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing;

use crate::{
    errors::SparrowError as AppError,
    models::{
        driver::Driver,
        geo::Coordinates,
        payment::Payment,
        review::Review,
        rider::Rider,
        trip::Trip,
    },
};

/// Redis keeps processed webhook ids this long; the processor stops redelivering well before.
const PROCESSED_EVENT_TTL_SECS: u64 = 7 * 24 * 60 * 60;
/// Compare-and-set attempts before a read-modify-write gives up with a conflict.
pub const MAX_WRITE_ATTEMPTS: usize = 5;
/// Web-mercator limit for the Redis geo index.
const MAX_INDEXABLE_LATITUDE: f64 = 85.051_128_78;

pub struct StoreKeys;

impl StoreKeys {
    pub fn trip(id: &str) -> String {
        format!("trip:{}", id)
    }

    pub fn rider(id: &str) -> String {
        format!("rider:{}", id)
    }

    pub fn driver(id: &str) -> String {
        format!("driver:{}", id)
    }

    pub fn payment(id: &str) -> String {
        format!("payment:{}", id)
    }

    pub fn review(id: &str) -> String {
        format!("review:{}", id)
    }

    pub fn driver_geo_index() -> &'static str {
        "drivers:geo"
    }

    pub fn payment_for_trip(trip_id: &str) -> String {
        format!("payment:trip:{}", trip_id)
    }

    pub fn payment_for_intent(intent_id: &str) -> String {
        format!("payment:intent:{}", intent_id)
    }

    pub fn rider_payments(rider_id: &str) -> String {
        format!("rider:{}:payments", rider_id)
    }

    pub fn driver_payments(driver_id: &str) -> String {
        format!("driver:{}:payments", driver_id)
    }

    pub fn open_payments() -> &'static str {
        "payments:open"
    }

    pub fn review_for_trip(trip_id: &str) -> String {
        format!("review:trip:{}", trip_id)
    }

    pub fn driver_reviews(driver_id: &str) -> String {
        format!("driver:{}:reviews", driver_id)
    }

    pub fn processor_event(event_id: &str) -> String {
        format!("webhook:event:{}", event_id)
    }
}

/// Document persistence for the marketplace.
///
/// Every `replace_*` is a compare-and-set: the caller hands over the new document
/// (already carrying `expected_version + 1`) and the write only lands if the stored
/// copy still has `expected_version`. `false` means somebody else wrote first.
#[async_trait]
pub trait RideStore: Send + Sync {
    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, AppError>;
    async fn insert_trip(&self, trip: &Trip) -> Result<(), AppError>;
    async fn replace_trip(&self, trip: &Trip, expected_version: u64) -> Result<bool, AppError>;

    async fn get_rider(&self, rider_id: &str) -> Result<Option<Rider>, AppError>;
    async fn insert_rider(&self, rider: &Rider) -> Result<(), AppError>;
    async fn replace_rider(&self, rider: &Rider, expected_version: u64) -> Result<bool, AppError>;

    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, AppError>;
    async fn insert_driver(&self, driver: &Driver) -> Result<(), AppError>;
    async fn replace_driver(&self, driver: &Driver, expected_version: u64) -> Result<bool, AppError>;
    /// Eligible drivers within `radius_m` of `point`, nearest first by the index's own metric.
    async fn nearby_drivers(&self, point: &Coordinates, radius_m: f64) -> Result<Vec<Driver>, AppError>;

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, AppError>;
    /// `false` when the trip slot is already held by another live payment.
    async fn insert_payment(&self, payment: &Payment) -> Result<bool, AppError>;
    async fn replace_payment(&self, payment: &Payment, expected_version: u64) -> Result<bool, AppError>;
    async fn payment_for_trip(&self, trip_id: &str) -> Result<Option<Payment>, AppError>;
    async fn payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>, AppError>;
    async fn payments_for_rider(&self, rider_id: &str) -> Result<Vec<Payment>, AppError>;
    async fn payments_for_driver(&self, driver_id: &str) -> Result<Vec<Payment>, AppError>;
    async fn open_payments(&self) -> Result<Vec<Payment>, AppError>;

    async fn has_processor_event(&self, event_id: &str) -> Result<bool, AppError>;
    /// `true` if this call recorded it first.
    async fn record_processor_event(&self, event_id: &str) -> Result<bool, AppError>;

    /// `false` when the trip already has a review.
    async fn insert_review(&self, review: &Review) -> Result<bool, AppError>;
    async fn reviews_for_driver(&self, driver_id: &str) -> Result<Vec<Review>, AppError>;
}

// ------------------------------
// In-memory store
// ------------------------------

#[derive(Default)]
struct MemoryInner {
    trips: HashMap<String, Trip>,
    riders: HashMap<String, Rider>,
    drivers: HashMap<String, Driver>,
    payments: HashMap<String, Payment>,
    payment_by_trip: HashMap<String, String>,
    payment_by_intent: HashMap<String, String>,
    reviews: HashMap<String, Review>,
    review_by_trip: HashMap<String, String>,
    processed_events: HashSet<String>,
}

/// Single-process store used for local runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn replace_versioned<T: Clone>(
    map: &mut HashMap<String, T>,
    id: &str,
    doc: &T,
    expected_version: u64,
    version_of: impl Fn(&T) -> u64,
) -> bool {
    match map.get_mut(id) {
        Some(current) if version_of(current) == expected_version => {
            *current = doc.clone();
            true
        }
        _ => false,
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, AppError> {
        Ok(self.inner.read().await.trips.get(trip_id).cloned())
    }

    async fn insert_trip(&self, trip: &Trip) -> Result<(), AppError> {
        self.inner.write().await.trips.insert(trip.id.clone(), trip.clone());
        Ok(())
    }

    async fn replace_trip(&self, trip: &Trip, expected_version: u64) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        Ok(replace_versioned(&mut inner.trips, &trip.id, trip, expected_version, |t| t.version))
    }

    async fn get_rider(&self, rider_id: &str) -> Result<Option<Rider>, AppError> {
        Ok(self.inner.read().await.riders.get(rider_id).cloned())
    }

    async fn insert_rider(&self, rider: &Rider) -> Result<(), AppError> {
        self.inner.write().await.riders.insert(rider.id.clone(), rider.clone());
        Ok(())
    }

    async fn replace_rider(&self, rider: &Rider, expected_version: u64) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        Ok(replace_versioned(&mut inner.riders, &rider.id, rider, expected_version, |r| r.version))
    }

    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, AppError> {
        Ok(self.inner.read().await.drivers.get(driver_id).cloned())
    }

    async fn insert_driver(&self, driver: &Driver) -> Result<(), AppError> {
        self.inner.write().await.drivers.insert(driver.id.clone(), driver.clone());
        Ok(())
    }

    async fn replace_driver(&self, driver: &Driver, expected_version: u64) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        Ok(replace_versioned(&mut inner.drivers, &driver.id, driver, expected_version, |d| d.version))
    }

    async fn nearby_drivers(&self, point: &Coordinates, radius_m: f64) -> Result<Vec<Driver>, AppError> {
        let inner = self.inner.read().await;
        let radius_km = radius_m / 1000.0;
        let mut hits: Vec<(f64, &Driver)> = inner
            .drivers
            .values()
            .filter(|d| d.is_eligible())
            .filter_map(|d| {
                let location = d.current_location?;
                let distance = point.haversine_km(&location);
                (distance <= radius_km).then_some((distance, d))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(hits.into_iter().map(|(_, d)| d.clone()).collect())
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, AppError> {
        Ok(self.inner.read().await.payments.get(payment_id).cloned())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        if payment.is_trip_payment() {
            if inner.payment_by_trip.contains_key(&payment.trip_id) {
                return Ok(false);
            }
            inner
                .payment_by_trip
                .insert(payment.trip_id.clone(), payment.id.clone());
        }
        if let Some(intent_id) = &payment.payment_intent_id {
            inner.payment_by_intent.insert(intent_id.clone(), payment.id.clone());
        }
        inner.payments.insert(payment.id.clone(), payment.clone());
        Ok(true)
    }

    async fn replace_payment(&self, payment: &Payment, expected_version: u64) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        if !replace_versioned(&mut inner.payments, &payment.id, payment, expected_version, |p| p.version) {
            return Ok(false);
        }
        if let Some(intent_id) = &payment.payment_intent_id {
            inner.payment_by_intent.insert(intent_id.clone(), payment.id.clone());
        }
        if payment.is_trip_payment()
            && payment.status.releases_trip_slot()
            && inner.payment_by_trip.get(&payment.trip_id) == Some(&payment.id)
        {
            inner.payment_by_trip.remove(&payment.trip_id);
        }
        Ok(true)
    }

    async fn payment_for_trip(&self, trip_id: &str) -> Result<Option<Payment>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .payment_by_trip
            .get(trip_id)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    async fn payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .payment_by_intent
            .get(intent_id)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    async fn payments_for_rider(&self, rider_id: &str) -> Result<Vec<Payment>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner.payments.values().filter(|p| p.rider_id == rider_id).cloned().collect())
    }

    async fn payments_for_driver(&self, driver_id: &str) -> Result<Vec<Payment>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner.payments.values().filter(|p| p.driver_id == driver_id).cloned().collect())
    }

    async fn open_payments(&self) -> Result<Vec<Payment>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner.payments.values().filter(|p| p.status.is_open()).cloned().collect())
    }

    async fn has_processor_event(&self, event_id: &str) -> Result<bool, AppError> {
        Ok(self.inner.read().await.processed_events.contains(event_id))
    }

    async fn record_processor_event(&self, event_id: &str) -> Result<bool, AppError> {
        Ok(self.inner.write().await.processed_events.insert(event_id.to_string()))
    }

    async fn insert_review(&self, review: &Review) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        if inner.review_by_trip.contains_key(&review.trip_id) {
            return Ok(false);
        }
        inner.review_by_trip.insert(review.trip_id.clone(), review.id.clone());
        inner.reviews.insert(review.id.clone(), review.clone());
        Ok(true)
    }

    async fn reviews_for_driver(&self, driver_id: &str) -> Result<Vec<Review>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner.reviews.values().filter(|r| r.driver_id == driver_id).cloned().collect())
    }
}

// ------------------------------
// Redis store
// ------------------------------

const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return 0
end
local doc = cjson.decode(current)
if tonumber(doc['version']) ~= tonumber(ARGV[1]) then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

const RELEASE_IF_HOLDER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisStore {
    manager: ConnectionManager,
    cas_script: Script,
    release_script: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to Redis at {}", redis_url);
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        let mut conn = manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!("Redis connection established");

        Ok(Self {
            manager,
            cas_script: Script::new(COMPARE_AND_SET),
            release_script: Script::new(RELEASE_IF_HOLDER),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let raw: Option<String> = self.conn().get(key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), AppError> {
        let json = serde_json::to_string(value)?;
        let _: () = self.conn().set(key, json).await?;
        Ok(())
    }

    async fn mget_json<T: DeserializeOwned>(&self, keys: &[String]) -> Result<Vec<T>, AppError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut self.conn()).await?;
        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(AppError::from))
            .collect()
    }

    async fn members_as<T: DeserializeOwned>(
        &self,
        set_key: &str,
        doc_key: fn(&str) -> String,
    ) -> Result<Vec<T>, AppError> {
        let ids: Vec<String> = self.conn().smembers(set_key).await?;
        let keys: Vec<String> = ids.iter().map(|id| doc_key(id)).collect();
        self.mget_json(&keys).await
    }

    async fn compare_and_set<T: Serialize + Sync>(
        &self,
        key: &str,
        doc: &T,
        expected_version: u64,
    ) -> Result<bool, AppError> {
        let json = serde_json::to_string(doc)?;
        let written: i64 = self
            .cas_script
            .key(key)
            .arg(expected_version)
            .arg(json)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(written == 1)
    }

    /// Keeps the geo index in step with eligibility.
    async fn sync_driver_index(&self, driver: &Driver) -> Result<(), AppError> {
        let mut conn = self.conn();
        match driver.current_location {
            Some(loc) if driver.is_eligible() && loc.latitude.abs() <= MAX_INDEXABLE_LATITUDE => {
                let _: i64 = redis::cmd("GEOADD")
                    .arg(StoreKeys::driver_geo_index())
                    .arg(loc.longitude)
                    .arg(loc.latitude)
                    .arg(&driver.id)
                    .query_async(&mut conn)
                    .await?;
            }
            _ => {
                let _: i64 = conn.zrem(StoreKeys::driver_geo_index(), &driver.id).await?;
            }
        }
        Ok(())
    }

    async fn index_payment(&self, payment: &Payment) -> Result<(), AppError> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(StoreKeys::rider_payments(&payment.rider_id), &payment.id)
            .ignore()
            .sadd(StoreKeys::driver_payments(&payment.driver_id), &payment.id)
            .ignore();
        if let Some(intent_id) = &payment.payment_intent_id {
            pipe.set(StoreKeys::payment_for_intent(intent_id), &payment.id).ignore();
        }
        if payment.status.is_open() {
            pipe.sadd(StoreKeys::open_payments(), &payment.id).ignore();
        } else {
            pipe.srem(StoreKeys::open_payments(), &payment.id).ignore();
        }
        let _: () = pipe.query_async(&mut self.conn()).await?;
        Ok(())
    }
}

#[async_trait]
impl RideStore for RedisStore {
    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, AppError> {
        self.get_json(&StoreKeys::trip(trip_id)).await
    }

    async fn insert_trip(&self, trip: &Trip) -> Result<(), AppError> {
        self.set_json(&StoreKeys::trip(&trip.id), trip).await
    }

    async fn replace_trip(&self, trip: &Trip, expected_version: u64) -> Result<bool, AppError> {
        self.compare_and_set(&StoreKeys::trip(&trip.id), trip, expected_version).await
    }

    async fn get_rider(&self, rider_id: &str) -> Result<Option<Rider>, AppError> {
        self.get_json(&StoreKeys::rider(rider_id)).await
    }

    async fn insert_rider(&self, rider: &Rider) -> Result<(), AppError> {
        self.set_json(&StoreKeys::rider(&rider.id), rider).await
    }

    async fn replace_rider(&self, rider: &Rider, expected_version: u64) -> Result<bool, AppError> {
        self.compare_and_set(&StoreKeys::rider(&rider.id), rider, expected_version).await
    }

    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, AppError> {
        self.get_json(&StoreKeys::driver(driver_id)).await
    }

    async fn insert_driver(&self, driver: &Driver) -> Result<(), AppError> {
        self.set_json(&StoreKeys::driver(&driver.id), driver).await?;
        self.sync_driver_index(driver).await
    }

    async fn replace_driver(&self, driver: &Driver, expected_version: u64) -> Result<bool, AppError> {
        let written = self
            .compare_and_set(&StoreKeys::driver(&driver.id), driver, expected_version)
            .await?;
        if written {
            self.sync_driver_index(driver).await?;
        }
        Ok(written)
    }

    async fn nearby_drivers(&self, point: &Coordinates, radius_m: f64) -> Result<Vec<Driver>, AppError> {
        let ids: Vec<String> = redis::cmd("GEOSEARCH")
            .arg(StoreKeys::driver_geo_index())
            .arg("FROMLONLAT")
            .arg(point.longitude)
            .arg(point.latitude)
            .arg("BYRADIUS")
            .arg(radius_m)
            .arg("m")
            .arg("ASC")
            .query_async(&mut self.conn())
            .await?;

        let keys: Vec<String> = ids.iter().map(|id| StoreKeys::driver(id)).collect();
        let drivers: Vec<Driver> = self.mget_json(&keys).await?;
        let by_id: HashMap<&str, &Driver> = drivers.iter().map(|d| (d.id.as_str(), d)).collect();

        // The index can trail a status change by one write; the document is authoritative.
        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()))
            .filter(|d| d.is_eligible())
            .map(|d| (*d).clone())
            .collect())
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, AppError> {
        self.get_json(&StoreKeys::payment(payment_id)).await
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<bool, AppError> {
        if payment.is_trip_payment() {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(StoreKeys::payment_for_trip(&payment.trip_id))
                .arg(&payment.id)
                .arg("NX")
                .query_async(&mut self.conn())
                .await?;
            if claimed.is_none() {
                return Ok(false);
            }
        }
        self.set_json(&StoreKeys::payment(&payment.id), payment).await?;
        self.index_payment(payment).await?;
        Ok(true)
    }

    async fn replace_payment(&self, payment: &Payment, expected_version: u64) -> Result<bool, AppError> {
        let written = self
            .compare_and_set(&StoreKeys::payment(&payment.id), payment, expected_version)
            .await?;
        if !written {
            return Ok(false);
        }
        self.index_payment(payment).await?;
        if payment.is_trip_payment() && payment.status.releases_trip_slot() {
            let _: i64 = self
                .release_script
                .key(StoreKeys::payment_for_trip(&payment.trip_id))
                .arg(&payment.id)
                .invoke_async(&mut self.conn())
                .await?;
        }
        Ok(true)
    }

    async fn payment_for_trip(&self, trip_id: &str) -> Result<Option<Payment>, AppError> {
        let payment_id: Option<String> = self.conn().get(StoreKeys::payment_for_trip(trip_id)).await?;
        match payment_id {
            Some(id) => self.get_payment(&id).await,
            None => Ok(None),
        }
    }

    async fn payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>, AppError> {
        let payment_id: Option<String> = self.conn().get(StoreKeys::payment_for_intent(intent_id)).await?;
        match payment_id {
            Some(id) => self.get_payment(&id).await,
            None => Ok(None),
        }
    }

    async fn payments_for_rider(&self, rider_id: &str) -> Result<Vec<Payment>, AppError> {
        self.members_as(&StoreKeys::rider_payments(rider_id), StoreKeys::payment)
            .await
    }

    async fn payments_for_driver(&self, driver_id: &str) -> Result<Vec<Payment>, AppError> {
        self.members_as(&StoreKeys::driver_payments(driver_id), StoreKeys::payment)
            .await
    }

    async fn open_payments(&self) -> Result<Vec<Payment>, AppError> {
        let payments: Vec<Payment> = self
            .members_as(StoreKeys::open_payments(), StoreKeys::payment)
            .await?;
        Ok(payments.into_iter().filter(|p| p.status.is_open()).collect())
    }

    async fn has_processor_event(&self, event_id: &str) -> Result<bool, AppError> {
        Ok(self.conn().exists(StoreKeys::processor_event(event_id)).await?)
    }

    async fn record_processor_event(&self, event_id: &str) -> Result<bool, AppError> {
        let recorded: Option<String> = redis::cmd("SET")
            .arg(StoreKeys::processor_event(event_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(PROCESSED_EVENT_TTL_SECS)
            .query_async(&mut self.conn())
            .await?;
        Ok(recorded.is_some())
    }

    async fn insert_review(&self, review: &Review) -> Result<bool, AppError> {
        let claimed: Option<String> = redis::cmd("SET")
            .arg(StoreKeys::review_for_trip(&review.trip_id))
            .arg(&review.id)
            .arg("NX")
            .query_async(&mut self.conn())
            .await?;
        if claimed.is_none() {
            return Ok(false);
        }
        self.set_json(&StoreKeys::review(&review.id), review).await?;
        let _: i64 = self
            .conn()
            .sadd(StoreKeys::driver_reviews(&review.driver_id), &review.id)
            .await?;
        Ok(true)
    }

    async fn reviews_for_driver(&self, driver_id: &str) -> Result<Vec<Review>, AppError> {
        self.members_as(&StoreKeys::driver_reviews(driver_id), StoreKeys::review)
            .await
    }
}
