// src/services/rider_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::SparrowError as AppError,
    models::rider::{Rider, RiderRegistration, RiderStats},
    services::store_service::{RideStore, MAX_WRITE_ATTEMPTS},
    utils::id_generator::{IdGenerator, IdType, WithGeneratedId},
};

#[async_trait]
pub trait RiderOperations: Send + Sync {
    async fn register_rider(&self, registration: RiderRegistration) -> Result<Rider, AppError>;
    async fn get_rider(&self, rider_id: &str) -> Result<Rider, AppError>;
    async fn set_stripe_customer(&self, rider_id: &str, customer_id: &str) -> Result<Rider, AppError>;
}

pub struct RiderService {
    store: Arc<dyn RideStore>,
}

impl RiderService {
    pub fn new(store: Arc<dyn RideStore>) -> Self {
        Self { store }
    }

    /// Read-modify-write with compare-and-set. `change` returns `false` to skip the write.
    pub async fn update_with<F>(&self, rider_id: &str, mut change: F) -> Result<(Rider, bool), AppError>
    where
        F: FnMut(&mut Rider) -> Result<bool, AppError> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut rider = self.get_rider(rider_id).await?;
            if !change(&mut rider)? {
                return Ok((rider, false));
            }
            let expected = rider.version;
            rider.version += 1;
            rider.updated_at = Utc::now();
            if self.store.replace_rider(&rider, expected).await? {
                return Ok((rider, true));
            }
            tracing::debug!("Rider {} changed underneath us, retrying", rider_id);
        }
        Err(AppError::conflict(format!("Rider {} is being updated concurrently", rider_id)))
    }
}

#[async_trait]
impl RiderOperations for RiderService {
    async fn register_rider(&self, registration: RiderRegistration) -> Result<Rider, AppError> {
        registration.validate()?;
        tracing::info!("Registering rider: {}", registration.email);

        let now = Utc::now();
        let rider = Rider {
            id: String::new(),
            name: registration.name.trim().to_string(),
            email: registration.email.trim().to_lowercase(),
            phone_number: registration.phone_number,
            device_token: registration.device_token,
            stripe_customer_id: None,
            is_active: true,
            stats: RiderStats::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
        .with_generated_id(IdType::Rider);

        self.store.insert_rider(&rider).await?;
        tracing::info!("Rider registered successfully: {}", rider.id);
        Ok(rider)
    }

    async fn get_rider(&self, rider_id: &str) -> Result<Rider, AppError> {
        if !IdGenerator::validate_id(rider_id, Some(IdType::Rider)) {
            return Err(AppError::RiderNotFound(rider_id.to_string()));
        }
        self.store
            .get_rider(rider_id)
            .await?
            .ok_or_else(|| AppError::RiderNotFound(rider_id.to_string()))
    }

    async fn set_stripe_customer(&self, rider_id: &str, customer_id: &str) -> Result<Rider, AppError> {
        let (rider, _) = self
            .update_with(rider_id, |rider| {
                if rider.stripe_customer_id.as_deref() == Some(customer_id) {
                    return Ok(false);
                }
                rider.stripe_customer_id = Some(customer_id.to_string());
                Ok(true)
            })
            .await?;
        Ok(rider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store_service::MemoryStore;

    fn registration() -> RiderRegistration {
        RiderRegistration {
            name: " Asha ".to_string(),
            email: "Asha@Example.com".to_string(),
            phone_number: "+919800000000".to_string(),
            device_token: Some("token-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_register_and_fetch() {
        let service = RiderService::new(Arc::new(MemoryStore::new()));
        let rider = service.register_rider(registration()).await.unwrap();
        assert_eq!(rider.name, "Asha");
        assert_eq!(rider.email, "asha@example.com");
        assert_eq!(rider.stats, RiderStats::default());

        let fetched = service.get_rider(&rider.id).await.unwrap();
        assert_eq!(fetched.id, rider.id);
    }

    #[tokio::test]
    async fn test_skipped_update_does_not_bump_version() {
        let service = RiderService::new(Arc::new(MemoryStore::new()));
        let rider = service.register_rider(registration()).await.unwrap();

        let updated = service.set_stripe_customer(&rider.id, "cus_1").await.unwrap();
        assert_eq!(updated.version, 1);
        let again = service.set_stripe_customer(&rider.id, "cus_1").await.unwrap();
        assert_eq!(again.version, 1);
    }

    #[tokio::test]
    async fn test_unknown_rider() {
        let service = RiderService::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            service.get_rider("rdr-251019-zzzzzzzz").await,
            Err(AppError::RiderNotFound(_))
        ));
    }
}
