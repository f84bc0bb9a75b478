use aws_config::{BehaviorVersion, Region, SdkConfig};
use ragprobe_domain::ProductionConfig;

/// Loads the shared SDK configuration for a module's clients.
///
/// Credentials resolve through the standard chain (environment, the named
/// profile in `~/.aws/credentials`, instance roles). Each module calls this
/// once behind a `OnceCell`, so the chain is walked at most once per module
/// lifetime.
pub(crate) async fn load_sdk_config(config: &ProductionConfig) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .profile_name(&config.aws_profile)
        .load()
        .await
}
