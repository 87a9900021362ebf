//! Configuration management for the big upload server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::upload::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    /// Root directory for the local provider
    pub path: PathBuf,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Key prefix for S3-compatible providers
    pub prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Local,
    Minio,
    R2,
    S3,
    B2,
}

impl StorageProvider {
    pub fn is_s3_compatible(&self) -> bool {
        !matches!(self, StorageProvider::Local)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite:...` or `memory`
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Age after which a session is eligible for the sweep
    pub big_upload_max_seconds: i64,

    /// Request body limit for a single chunk request
    pub max_chunk_bytes: usize,

    /// Check reassembled length (and digest, if declared) before handoff
    pub verify_reassembly: bool,

    /// Static bearer token required on every phase, if set
    pub api_token: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            big_upload_max_seconds: 24 * 60 * 60,
            // Chunk plus multipart framing
            max_chunk_bytes: DEFAULT_CHUNK_SIZE * 2,
            verify_reassembly: false,
            api_token: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                provider: StorageProvider::Local,
                path: PathBuf::from("./data/uploads"),
                endpoint: "http://localhost:9000".to_string(),
                bucket: "uploads".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
                prefix: "big-upload".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite:./big-upload.db?mode=rwc".to_string(),
            },
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();

        let provider = match env::var("STORAGE_PROVIDER")
            .unwrap_or_else(|_| "local".to_string())
            .as_str()
        {
            "minio" => StorageProvider::Minio,
            "r2" => StorageProvider::R2,
            "s3" => StorageProvider::S3,
            "b2" => StorageProvider::B2,
            _ => StorageProvider::Local,
        };

        // S3 credentials are only mandatory when an S3-compatible provider is chosen
        let s3_var = |name: &str, fallback: &str| -> Result<String, env::VarError> {
            match env::var(name) {
                Ok(value) => Ok(value),
                Err(e) if provider.is_s3_compatible() => Err(e),
                Err(_) => Ok(fallback.to_string()),
            }
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(defaults.server.port),
            },
            storage: StorageConfig {
                provider,
                path: env::var("STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.path),
                endpoint: s3_var("S3_ENDPOINT", &defaults.storage.endpoint)?,
                bucket: s3_var("S3_BUCKET", &defaults.storage.bucket)?,
                access_key: s3_var("S3_ACCESS_KEY", &defaults.storage.access_key)?,
                secret_key: s3_var("S3_SECRET_KEY", &defaults.storage.secret_key)?,
                region: env::var("S3_REGION").ok().or(defaults.storage.region),
                prefix: env::var("S3_PREFIX").unwrap_or(defaults.storage.prefix),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            upload: UploadConfig {
                big_upload_max_seconds: env::var("BIG_UPLOAD_MAX_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.upload.big_upload_max_seconds),
                max_chunk_bytes: env::var("BIG_UPLOAD_CHUNK_BYTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.upload.max_chunk_bytes),
                verify_reassembly: env::var("BIG_UPLOAD_VERIFY")
                    .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false),
                api_token: env::var("UPLOAD_API_TOKEN").ok().filter(|t| !t.is_empty()),
            },
        })
    }
}
