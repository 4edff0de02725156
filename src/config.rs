//! Operator configuration from environment variables.

/// Images and switches the operator picks up at startup.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Image used to export migration files out of the user's image without
    /// executing it. The default `:debug` tag includes a shell and tar.
    pub crane_image: String,

    /// Atlas CLI image used to apply migrations.
    pub atlas_image: String,

    /// Enables plaintext registry pulls for the fetch stage (local dev).
    pub allow_insecure_registries: bool,

    /// Skips the admission webhook server entirely (e2e environments).
    pub disable_admission: bool,

    /// Fallback AWS region when a database bundle omits one.
    pub aws_region_default: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            crane_image: "gcr.io/go-containerregistry/crane:debug".to_string(),
            atlas_image: "arigaio/atlas:latest".to_string(),
            allow_insecure_registries: false,
            disable_admission: false,
            aws_region_default: None,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            crane_image: env_or("CRANE_IMAGE", defaults.crane_image),
            atlas_image: env_or("ATLAS_IMAGE", defaults.atlas_image),
            allow_insecure_registries: env_is_true("ALLOW_INSECURE_REGISTRIES"),
            disable_admission: env_is_true("DISABLE_ADMISSION"),
            aws_region_default: std::env::var("AWS_REGION_DEFAULT")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default,
    }
}

fn env_is_true(key: &str) -> bool {
    std::env::var(key).is_ok_and(|v| v == "true")
}
