use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Connection settings for a production environment under test.
///
/// Immutable for the lifetime of a test module. `read_only_mode` gates every
/// external side effect; it defaults to `true` so a misconfigured harness can
/// never write into production by accident.
#[derive(Debug, Clone, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct ProductionConfig {
    pub region: String,
    pub environment: String,
    pub aws_profile: String,
    pub read_only_mode: bool,
    pub resources: ResourceIds,
}

/// Identifiers of the provisioned resources the harness touches.
#[derive(Debug, Clone, Default, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct ResourceIds {
    pub open_search_collection_endpoint: String,
    pub open_search_index: String,
    pub bedrock_models: Vec<String>,
    pub dynamo_db_tables: DynamoDbTables,
}

#[derive(Debug, Clone, Default, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct DynamoDbTables {
    pub sessions: String,
    pub users: String,
    pub documents: String,
}

const ENV_REGION: &str = "AWS_REGION";
const ENV_PROFILE: &str = "AWS_PROFILE";
const ENV_SESSION_TABLE: &str = "PROD_DYNAMODB_SESSION_TABLE";

impl ProductionConfig {
    /// Creates a read-only configuration with empty resource identifiers.
    pub fn new(region: impl Into<String>, aws_profile: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            environment: "production".to_string(),
            aws_profile: aws_profile.into(),
            read_only_mode: true,
            resources: ResourceIds::default(),
        }
    }

    /// Builds the configuration from the process environment.
    ///
    /// Loads `.env.production` from the working directory first (missing file
    /// is fine), then requires `AWS_REGION`, `AWS_PROFILE` and
    /// `PROD_DYNAMODB_SESSION_TABLE`. All other identifiers are optional and
    /// default to empty values that individual modules validate lazily.
    pub fn from_env() -> Result<Self> {
        dotenvy::from_filename(".env.production").ok();

        let missing: Vec<&str> = [ENV_REGION, ENV_PROFILE, ENV_SESSION_TABLE]
            .into_iter()
            .filter(|name| std::env::var(name).map_or(true, |v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingEnvironment(missing.join(", ")));
        }

        let env_or = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };

        Ok(Self {
            region: env_or(ENV_REGION, ""),
            environment: env_or("ENVIRONMENT", "production"),
            aws_profile: env_or(ENV_PROFILE, ""),
            read_only_mode: env_or("PROD_READ_ONLY_MODE", "true") != "false",
            resources: ResourceIds {
                open_search_collection_endpoint: env_or("PROD_OPENSEARCH_COLLECTION_ENDPOINT", ""),
                open_search_index: env_or("PROD_OPENSEARCH_INDEX", "documents"),
                bedrock_models: vec![
                    "amazon.nova-lite-v1:0".to_string(),
                    "amazon.nova-micro-v1:0".to_string(),
                    "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
                ],
                dynamo_db_tables: DynamoDbTables {
                    sessions: env_or(ENV_SESSION_TABLE, ""),
                    users: env_or("PROD_DYNAMODB_USER_TABLE", ""),
                    documents: env_or("PROD_DYNAMODB_DOCUMENT_TABLE", ""),
                },
            },
        })
    }

    /// Fails fast when the fields every module depends on are absent.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.region.trim().is_empty() {
            missing.push("region");
        }
        if self.aws_profile.trim().is_empty() {
            missing.push("awsProfile");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingConfig(missing.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn config_fixture() -> ProductionConfig {
        ProductionConfig::new("ap-northeast-1", "prod-readonly").resources(
            ResourceIds::default()
                .open_search_index("documents")
                .dynamo_db_tables(DynamoDbTables::default().sessions("prod-sessions")),
        )
    }

    #[test]
    fn test_new_defaults_to_read_only() {
        let actual = ProductionConfig::new("ap-northeast-1", "prod-readonly");
        assert_eq!(actual.read_only_mode, true);
        assert_eq!(actual.environment, "production");
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let fixture = config_fixture();
        assert!(fixture.validate().is_ok());
    }

    #[test]
    fn test_validate_lists_missing_fields() {
        let fixture = ProductionConfig::new("", "");
        let actual = fixture.validate().unwrap_err().to_string();
        assert_eq!(actual, "Missing required configuration: region, awsProfile");
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let fixture = config_fixture();
        let json = serde_json::to_string(&fixture).unwrap();
        let actual: ProductionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(actual.region, fixture.region);
        assert_eq!(
            actual.resources.dynamo_db_tables.sessions,
            fixture.resources.dynamo_db_tables.sessions
        );
    }
}
