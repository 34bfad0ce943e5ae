use std::fmt;

use serde::Serialize;

/// Identity of a published stream as handed over by the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRequest {
    /// Correlation id of the connection, echoed in callbacks.
    pub client_id: String,
    pub ip: String,
    pub vhost: String,
    pub app: String,
    pub stream: String,
    pub param: String,
}

impl StreamRequest {
    pub fn new(vhost: impl Into<String>, app: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            client_id: String::new(),
            ip: String::new(),
            vhost: vhost.into(),
            app: app.into(),
            stream: stream.into(),
            param: String::new(),
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>, ip: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self.ip = ip.into();
        self
    }
}

impl fmt::Display for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.vhost, self.app, self.stream)
    }
}
