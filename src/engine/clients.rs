// Client validation, search and resolution

//! # Client Resolver
//!
//! Staff-created applications arrive with raw client details; the engine
//! needs a resolved client id before a request can exist. This module owns:
//! - [`ClientValidator`]: Uzbek phone normalisation and the name / address /
//!   language rules for new client records,
//! - [`ClientResolver`]: the three search strategies (phone is
//!   authoritative, name is a ranked substring search capped at 10, id is a
//!   direct lookup) and duplicate-refusing client creation.

use std::sync::Arc;

use tracing::info;

use crate::models::{Role, User};
use crate::{EngineError, Result};

use super::storage::Store;

const MAX_NAME_CHARS: usize = 100;
const MAX_ADDRESS_CHARS: usize = 500;
const NAME_SEARCH_CAP: usize = 10;

/// Validated input for a new client record.
#[derive(Debug, Clone)]
pub struct NewClientData {
    pub full_name: String,
    pub phone: String,
    pub address: Option<String>,
    pub language: String,
}

/// Outcome of one search strategy.
#[derive(Debug, Clone)]
pub enum ClientSearchResult {
    Found(User),
    /// More than one candidate; ranked, capped at ten.
    Multiple(Vec<User>),
    NotFound,
}

/// Field validation for client data.
pub struct ClientValidator;

impl ClientValidator {
    /// Normalise to `+998XXXXXXXXX`. Nine local digits get the country
    /// code prepended; twelve digits starting with 998 are accepted as-is.
    /// Anything else is rejected.
    pub fn normalize_phone(phone: &str) -> Result<String> {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        let normalised = if digits.len() == 9 {
            format!("998{digits}")
        } else if digits.len() == 12 && digits.starts_with("998") {
            digits
        } else {
            return Err(EngineError::ValidationFailed {
                field: "phone".to_string(),
                reason: format!("'{phone}' is not a valid Uzbek phone number"),
            });
        };
        Ok(format!("+{normalised}"))
    }

    /// Both stored spellings of a normalised phone: with and without the
    /// leading `+`.
    pub fn phone_variants(normalised: &str) -> Vec<String> {
        vec![
            normalised.to_string(),
            normalised.trim_start_matches('+').to_string(),
        ]
    }

    /// Full names are 2-100 characters of letters (any script), spaces,
    /// hyphens and apostrophes.
    pub fn validate_full_name(name: &str) -> Result<()> {
        let trimmed = name.trim();
        let count = trimmed.chars().count();
        if count < 2 || count > MAX_NAME_CHARS {
            return Err(EngineError::ValidationFailed {
                field: "full_name".to_string(),
                reason: format!("name must be 2-{MAX_NAME_CHARS} characters"),
            });
        }
        let valid = trimmed
            .chars()
            .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'');
        if !valid {
            return Err(EngineError::ValidationFailed {
                field: "full_name".to_string(),
                reason: "name may contain only letters, spaces, hyphens and apostrophes"
                    .to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_address(address: &str) -> Result<()> {
        if address.chars().count() > MAX_ADDRESS_CHARS {
            return Err(EngineError::ValidationFailed {
                field: "address".to_string(),
                reason: format!("address exceeds {MAX_ADDRESS_CHARS} characters"),
            });
        }
        Ok(())
    }

    pub fn validate_language(language: &str) -> Result<()> {
        if language != "uz" && language != "ru" {
            return Err(EngineError::ValidationFailed {
                field: "language".to_string(),
                reason: format!("language '{language}' must be 'uz' or 'ru'"),
            });
        }
        Ok(())
    }

    /// Validate a full new-client bundle; returns the normalised phone.
    pub fn validate_client_data(data: &NewClientData) -> Result<String> {
        Self::validate_full_name(&data.full_name)?;
        let phone = Self::normalize_phone(&data.phone)?;
        if let Some(address) = &data.address {
            Self::validate_address(address)?;
        }
        Self::validate_language(&data.language)?;
        Ok(phone)
    }
}

/// Search strategies and duplicate-refusing creation over the user store.
pub struct ClientResolver {
    store: Arc<dyn Store>,
}

impl ClientResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ClientResolver { store }
    }

    /// Exact match on the normalised phone (both stored spellings).
    pub async fn search_by_phone(&self, phone: &str) -> Result<ClientSearchResult> {
        let normalised = ClientValidator::normalize_phone(phone)?;
        let variants = ClientValidator::phone_variants(&normalised);
        Ok(match self.store.find_user_by_phone(&variants).await? {
            Some(user) => ClientSearchResult::Found(user),
            None => ClientSearchResult::NotFound,
        })
    }

    /// Case-insensitive substring match; exact matches rank first, results
    /// capped at ten.
    pub async fn search_by_name(&self, name: &str) -> Result<ClientSearchResult> {
        let fragment = name.trim();
        if fragment.is_empty() {
            return Ok(ClientSearchResult::NotFound);
        }
        let mut matches = self.store.search_clients_by_name(fragment).await?;

        let needle = fragment.to_lowercase();
        matches.sort_by_key(|user| {
            let exact = user.full_name.to_lowercase() == needle;
            (!exact, user.full_name.clone())
        });
        matches.truncate(NAME_SEARCH_CAP);

        Ok(if matches.is_empty() {
            ClientSearchResult::NotFound
        } else if matches.len() == 1 {
            ClientSearchResult::Found(matches.remove(0))
        } else {
            ClientSearchResult::Multiple(matches)
        })
    }

    pub async fn search_by_id(&self, client_id: i64) -> Result<ClientSearchResult> {
        Ok(match self.store.get_user(client_id).await? {
            Some(user) if user.role == Role::Client => ClientSearchResult::Found(user),
            _ => ClientSearchResult::NotFound,
        })
    }

    /// Create a client record. Refuses duplicates on the normalised phone.
    pub async fn create_client(&self, data: &NewClientData) -> Result<i64> {
        let phone = ClientValidator::validate_client_data(data)?;
        let variants = ClientValidator::phone_variants(&phone);
        if self.store.find_user_by_phone(&variants).await?.is_some() {
            return Err(EngineError::ValidationFailed {
                field: "phone".to_string(),
                reason: format!("a client with phone {phone} already exists"),
            });
        }

        let user = User::new_client(
            0,
            phone,
            data.full_name.trim(),
            data.language.clone(),
            data.address.clone(),
        );
        let id = self.store.insert_user(&user).await?;
        info!(client_id = id, "created client");
        Ok(id)
    }

    /// Resolve a client id for a staff-created application: phone is
    /// authoritative, a unique name match is accepted next, otherwise a new
    /// client is registered.
    pub async fn resolve_or_create(&self, data: &NewClientData) -> Result<i64> {
        if let ClientSearchResult::Found(user) = self.search_by_phone(&data.phone).await? {
            return Ok(user.id);
        }
        if let ClientSearchResult::Found(user) = self.search_by_name(&data.full_name).await? {
            return Ok(user.id);
        }
        self.create_client(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::InMemoryStore;

    fn client(name: &str, phone: &str) -> NewClientData {
        NewClientData {
            full_name: name.to_string(),
            phone: phone.to_string(),
            address: None,
            language: "uz".to_string(),
        }
    }

    #[test]
    fn phone_normalisation_boundaries() {
        assert_eq!(
            ClientValidator::normalize_phone("901234567").unwrap(),
            "+998901234567"
        );
        assert_eq!(
            ClientValidator::normalize_phone("998901234567").unwrap(),
            "+998901234567"
        );
        assert_eq!(
            ClientValidator::normalize_phone("+998901234567").unwrap(),
            "+998901234567"
        );
        assert_eq!(
            ClientValidator::normalize_phone("+998 90 123-45-67").unwrap(),
            "+998901234567"
        );
        assert!(ClientValidator::normalize_phone("123").is_err());
        assert!(ClientValidator::normalize_phone("").is_err());
    }

    #[test]
    fn name_validation_boundaries() {
        assert!(ClientValidator::validate_full_name("O'Connor").is_ok());
        assert!(ClientValidator::validate_full_name("Jean-Pierre").is_ok());
        assert!(ClientValidator::validate_full_name("Алиев Вали").is_ok());
        assert!(ClientValidator::validate_full_name("").is_err());
        assert!(ClientValidator::validate_full_name("A").is_err());
        assert!(ClientValidator::validate_full_name(&"x".repeat(101)).is_err());
        assert!(ClientValidator::validate_full_name("R2-D2").is_err());
    }

    #[tokio::test]
    async fn phone_search_is_exact_on_normalised_forms() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = ClientResolver::new(Arc::clone(&store) as Arc<dyn Store>);

        let id = resolver
            .create_client(&client("Ahmad Karimov", "901234567"))
            .await
            .unwrap();

        // Any spelling of the same number resolves.
        for query in ["901234567", "998901234567", "+998901234567"] {
            match resolver.search_by_phone(query).await.unwrap() {
                ClientSearchResult::Found(user) => assert_eq!(user.id, id),
                other => panic!("expected Found, got {other:?}"),
            }
        }

        assert!(matches!(
            resolver.search_by_phone("907654321").await.unwrap(),
            ClientSearchResult::NotFound
        ));
    }

    #[tokio::test]
    async fn duplicate_phone_is_refused() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = ClientResolver::new(Arc::clone(&store) as Arc<dyn Store>);

        resolver
            .create_client(&client("Ahmad Karimov", "901234567"))
            .await
            .unwrap();
        let err = resolver
            .create_client(&client("Boshqa Odam", "+998901234567"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn name_search_ranks_exact_matches_first() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = ClientResolver::new(Arc::clone(&store) as Arc<dyn Store>);

        resolver
            .create_client(&client("Karim", "901111111"))
            .await
            .unwrap();
        resolver
            .create_client(&client("Karimov Aziz", "902222222"))
            .await
            .unwrap();

        match resolver.search_by_name("karim").await.unwrap() {
            ClientSearchResult::Multiple(users) => {
                assert_eq!(users[0].full_name, "Karim");
                assert_eq!(users.len(), 2);
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_prefers_phone_then_name_then_creates() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = ClientResolver::new(Arc::clone(&store) as Arc<dyn Store>);

        let existing = resolver
            .create_client(&client("Ahmad Karimov", "901234567"))
            .await
            .unwrap();

        // Same phone, different name spelling: phone wins.
        let by_phone = resolver
            .resolve_or_create(&client("Axmad Karimov", "998901234567"))
            .await
            .unwrap();
        assert_eq!(by_phone, existing);

        // Unknown phone but unique name match: name wins.
        let by_name = resolver
            .resolve_or_create(&client("Ahmad Karimov", "909999999"))
            .await
            .unwrap();
        assert_eq!(by_name, existing);

        // Nothing matches: a new client is registered.
        let created = resolver
            .resolve_or_create(&client("Yangi Mijoz", "903333333"))
            .await
            .unwrap();
        assert_ne!(created, existing);
    }
}
