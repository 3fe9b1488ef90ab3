use std::env;

/// Service configuration, loaded once at startup.
///
/// Provider secrets are required: a deployment missing one fails fast at
/// boot instead of limping along with a dead money path.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Public base URL of this service (webhook callbacks, checkout redirects).
    pub base_url: String,

    // Identity provider
    pub clerk_jwks_url: String,
    pub clerk_webhook_secret: String,

    // Payment provider
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,

    // Inference provider
    pub replicate_api_token: String,
    pub replicate_webhook_secret: String,
    pub replicate_model_version: String,

    // Object storage
    pub storage_url: String,
    pub storage_service_key: String,
    pub storage_bucket: String,

    // Rate limiting (generation requests per user per window)
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: i64,

    pub signup_bonus_credits: i64,
}

fn require(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("{} must be set", name))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = parse_or("PORT", 3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "magicroom.db".to_string()),
            base_url,
            clerk_jwks_url: require("CLERK_JWKS_URL"),
            clerk_webhook_secret: require("CLERK_WEBHOOK_SECRET"),
            stripe_secret_key: require("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: require("STRIPE_WEBHOOK_SECRET"),
            replicate_api_token: require("REPLICATE_API_TOKEN"),
            replicate_webhook_secret: require("REPLICATE_WEBHOOK_SECRET"),
            replicate_model_version: require("REPLICATE_MODEL_VERSION"),
            storage_url: require("STORAGE_URL"),
            storage_service_key: require("STORAGE_SERVICE_KEY"),
            storage_bucket: env::var("STORAGE_BUCKET")
                .unwrap_or_else(|_| "room-images".to_string()),
            rate_limit_max: parse_or("RATE_LIMIT_MAX", 10),
            rate_limit_window_secs: parse_or("RATE_LIMIT_WINDOW_SECS", 60),
            signup_bonus_credits: parse_or("SIGNUP_BONUS_CREDITS", 3),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
