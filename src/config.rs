use std::env;

#[derive(Clone, Debug, PartialEq)]
pub enum DataSource {
    Local,
    Agent,
}

impl DataSource {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "agent" => DataSource::Agent,
            _ => DataSource::Local,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub data_source: DataSource,
    pub agent_url: String,
    pub agent_timeout_secs: u64,
    pub customer_id: String,
    pub query_stale_secs: u64,
    pub flow_idle_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "servicebook.db".to_string()),
            data_source: env::var("DATA_SOURCE")
                .map(|v| DataSource::parse(&v))
                .unwrap_or(DataSource::Local),
            agent_url: env::var("AGENT_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            agent_timeout_secs: env::var("AGENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            customer_id: env::var("CUSTOMER_ID").unwrap_or_else(|_| "cust-001".to_string()),
            query_stale_secs: env::var("QUERY_STALE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            flow_idle_secs: env::var("FLOW_IDLE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1800),
        }
    }
}
