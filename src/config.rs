use log::warn;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_DATABASE_URL: &str = "sqlite:drawroom.db";
const DEFAULT_CHAT_HISTORY_LIMIT: i64 = 1000;

pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub database_url: String,
    pub chat_history_limit: i64,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using an insecure development secret");
            "dev-secret-change-me".to_string()
        });

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let chat_history_limit = std::env::var("CHAT_HISTORY_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CHAT_HISTORY_LIMIT);

        Config {
            port,
            jwt_secret,
            database_url,
            chat_history_limit,
        }
    }
}
