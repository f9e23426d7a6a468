use thiserror::Error;

/// 协作服务客户端错误
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    #[error("request to {target} timed out")]
    Timeout { target: String },

    #[error("transport error talking to {target}: {message}")]
    Transport { target: String, message: String },

    #[error("{target} returned status {status}: {body}")]
    Status {
        target: String,
        status: u16,
        body: String,
    },

    #[error("could not decode response from {target}: {message}")]
    Decode { target: String, message: String },

    #[error("{target} rejected the request: {message}")]
    Rejected { target: String, message: String },

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// 按错误性质转换 reqwest 错误
    pub fn from_reqwest(target: &str, err: reqwest::Error) -> Self {
        let target = target.to_string();
        if err.is_timeout() {
            ClientError::Timeout { target }
        } else if err.is_connect() {
            ClientError::Connect {
                target,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ClientError::Decode {
                target,
                message: err.to_string(),
            }
        } else {
            ClientError::Transport {
                target,
                message: err.to_string(),
            }
        }
    }

    pub fn timeout(target: &str) -> Self {
        ClientError::Timeout {
            target: target.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, ClientError::Connect { .. })
    }
}

/// 补全地址的协议前缀，注册中心只返回 host:port
pub fn normalize_base_url(addr: &str) -> String {
    let trimmed = addr.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
