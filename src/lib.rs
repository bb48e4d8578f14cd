// src/lib.rs

pub mod config;

pub mod entities {
    pub mod prelude;
    pub mod node_provider_daily_summary;
    pub mod node_reward_metrics;
    pub mod xdr_icp_conversion_rates;
}

pub mod services {
    pub mod coingecko;
    pub mod csv_parser;
    pub mod database_writer;
    pub mod dre_runner;
    pub mod price_service;
    pub mod schema;
}

pub mod jobs;
pub mod models;
