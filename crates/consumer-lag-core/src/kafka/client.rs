//! Kafka client for protocol-level communication with a single broker.

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{
    ApiKey, RequestHeader, ResponseHeader, SaslAuthenticateRequest, SaslAuthenticateResponse,
    SaslHandshakeRequest, SaslHandshakeResponse,
};
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};
use socket2::{SockRef, TcpKeepalive};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

use crate::config::{KafkaConfig, SaslMechanism};
use crate::error::KafkaError;
use crate::Result;

const CLIENT_ID: &str = "consumer-lag";

/// Byte stream to a broker, plain TCP or TLS.
trait BrokerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BrokerStream for T {}

/// Kafka client bound to one broker connection at a time.
pub struct KafkaClient {
    config: KafkaConfig,

    /// Bound on one request/response exchange
    request_timeout: Duration,

    stream: Mutex<Option<Box<dyn BrokerStream>>>,

    /// Address of the broker we ended up on
    connected_to: Mutex<Option<String>>,

    correlation_id: AtomicI32,
}

impl KafkaClient {
    pub fn new(config: KafkaConfig, request_timeout: Duration) -> Self {
        Self {
            config,
            request_timeout,
            stream: Mutex::new(None),
            connected_to: Mutex::new(None),
            correlation_id: AtomicI32::new(1),
        }
    }

    /// Connect to the first reachable bootstrap server.
    pub async fn connect(&self) -> Result<()> {
        for server in &self.config.bootstrap_servers {
            match self.open_stream(server).await {
                Ok(stream) => {
                    *self.stream.lock().await = Some(stream);
                    *self.connected_to.lock().await = Some(server.clone());

                    if self.config.security.security_protocol.uses_sasl() {
                        self.authenticate().await?;
                    }

                    debug!("Connected to Kafka broker: {}", server);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Failed to connect to {}: {}", server, e);
                }
            }
        }

        Err(KafkaError::NoBrokersAvailable.into())
    }

    /// Broker address of the live connection, if any.
    pub async fn connected_to(&self) -> Option<String> {
        self.connected_to.lock().await.clone()
    }

    async fn open_stream(&self, server: &str) -> Result<Box<dyn BrokerStream>> {
        let connect_failed = |message: String| KafkaError::ConnectionFailed {
            broker: server.to_string(),
            message,
        };

        let tcp_stream = tokio::time::timeout(self.request_timeout, TcpStream::connect(server))
            .await
            .map_err(|_| KafkaError::Timeout(format!("connecting to {}", server)))?
            .map_err(|e| connect_failed(e.to_string()))?;

        self.configure_socket(&tcp_stream, server)?;

        if !self.config.security.security_protocol.uses_tls() {
            return Ok(Box::new(tcp_stream));
        }

        let tls_config = super::tls::build_tls_config(&self.config.security)?;
        let connector = TlsConnector::from(Arc::new(tls_config));

        let hostname = server
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(server);
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|e| connect_failed(format!("Invalid server name for TLS: {}", e)))?;

        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| connect_failed(format!("TLS handshake failed: {}", e)))?;

        debug!("TLS session established with {}", server);
        Ok(Box::new(tls_stream))
    }

    /// Apply keepalive and nodelay options from the connection config.
    fn configure_socket(&self, stream: &TcpStream, server: &str) -> Result<()> {
        let options = &self.config.connection;
        let sock_ref = SockRef::from(stream);
        let socket_error = |what: &str, e: std::io::Error| KafkaError::ConnectionFailed {
            broker: server.to_string(),
            message: format!("Failed to set {}: {}", what, e),
        };

        if options.tcp_nodelay {
            sock_ref
                .set_nodelay(true)
                .map_err(|e| socket_error("TCP_NODELAY", e))?;
        }

        if options.tcp_keepalive {
            let keepalive = TcpKeepalive::new()
                .with_time(Duration::from_secs(options.keepalive_time_secs))
                .with_interval(Duration::from_secs(options.keepalive_interval_secs));
            sock_ref
                .set_tcp_keepalive(&keepalive)
                .map_err(|e| socket_error("TCP keepalive", e))?;
        }

        Ok(())
    }

    async fn authenticate(&self) -> Result<()> {
        let security = &self.config.security;

        match security.sasl_mechanism {
            Some(SaslMechanism::Plain) => {
                let username = security.sasl_username.as_deref().unwrap_or("");
                let password = security.sasl_password.as_deref().unwrap_or("");
                self.sasl_plain(username, password).await
            }
            None => Err(crate::Error::Authentication(
                "SASL security protocol selected without a mechanism".to_string(),
            )),
        }
    }

    async fn sasl_plain(&self, username: &str, password: &str) -> Result<()> {
        let handshake = SaslHandshakeRequest::default().with_mechanism(StrBytes::from_static_str("PLAIN"));
        let handshake: SaslHandshakeResponse =
            self.send_request(ApiKey::SaslHandshake, handshake).await?;
        if handshake.error_code != 0 {
            return Err(crate::Error::Authentication(format!(
                "broker rejected SASL/PLAIN (error code {})",
                handshake.error_code
            )));
        }

        // authzid NUL authcid NUL passwd
        let mut token = Vec::with_capacity(username.len() + password.len() + 2);
        token.push(0);
        token.extend_from_slice(username.as_bytes());
        token.push(0);
        token.extend_from_slice(password.as_bytes());

        let request = SaslAuthenticateRequest::default().with_auth_bytes(Bytes::from(token));
        let response: SaslAuthenticateResponse =
            self.send_request(ApiKey::SaslAuthenticate, request).await?;

        if response.error_code != 0 {
            let reason = response
                .error_message
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("error code {}", response.error_code));
            return Err(crate::Error::Authentication(format!(
                "SASL authentication failed: {}",
                reason
            )));
        }

        debug!("SASL/PLAIN authentication succeeded");
        Ok(())
    }

    /// Send a request and wait for its response, bounded by the request timeout.
    pub async fn send_request<Req, Resp>(&self, api_key: ApiKey, request: Req) -> Result<Resp>
    where
        Req: Encodable,
        Resp: Decodable,
    {
        let api_version = api_version(api_key);
        let correlation_id = self.correlation_id.fetch_add(1, Ordering::SeqCst);
        let frame = encode_frame(api_key, api_version, correlation_id, &request)?;

        trace!(
            "Sending {:?} v{} correlation_id={} len={}",
            api_key,
            api_version,
            correlation_id,
            frame.len() - 4
        );

        let mut body = tokio::time::timeout(self.request_timeout, self.round_trip(&frame))
            .await
            .map_err(|_| {
                KafkaError::Timeout(format!(
                    "{:?} request exceeded {:?}",
                    api_key, self.request_timeout
                ))
            })??;

        let header = ResponseHeader::decode(&mut body, api_key.response_header_version(api_version))
            .map_err(|e| KafkaError::Protocol(format!("Failed to decode response header: {:?}", e)))?;

        if header.correlation_id != correlation_id {
            return Err(KafkaError::Protocol(format!(
                "correlation id mismatch: sent {}, received {}",
                correlation_id, header.correlation_id
            ))
            .into());
        }

        let response = Resp::decode(&mut body, api_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to decode {:?} response: {:?}", api_key, e)))?;

        Ok(response)
    }

    /// Write one length-prefixed frame and read the length-prefixed reply.
    async fn round_trip(&self, frame: &[u8]) -> Result<Bytes> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| KafkaError::Protocol("Not connected".to_string()))?;

        let io_error = |what: &str, e: std::io::Error| {
            KafkaError::Protocol(format!("Failed to {}: {}", what, e))
        };

        stream
            .write_all(frame)
            .await
            .map_err(|e| io_error("send request", e))?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| io_error("read response length", e))?;
        let len = i32::from_be_bytes(len_buf);
        if len < 0 {
            return Err(KafkaError::Protocol(format!("negative response length {}", len)).into());
        }

        let mut body = vec![0u8; len as usize];
        stream
            .read_exact(&mut body)
            .await
            .map_err(|e| io_error("read response body", e))?;

        Ok(Bytes::from(body))
    }
}

/// API versions spoken by the probe.
///
/// OffsetFetch must be at least v1 so offsets come from Kafka rather than
/// ZooKeeper, and stays below v8 where the request switches to group batches.
fn api_version(api_key: ApiKey) -> i16 {
    match api_key {
        ApiKey::Metadata => 9,
        ApiKey::ListOffsets => 5,
        ApiKey::OffsetFetch => 5,
        ApiKey::FindCoordinator => 2,
        ApiKey::SaslHandshake => 1,
        ApiKey::SaslAuthenticate => 2,
        _ => 0,
    }
}

/// Encode header and body behind a big-endian length prefix.
fn encode_frame<Req: Encodable>(
    api_key: ApiKey,
    api_version: i16,
    correlation_id: i32,
    request: &Req,
) -> Result<BytesMut> {
    let header = RequestHeader::default()
        .with_request_api_key(api_key as i16)
        .with_request_api_version(api_version)
        .with_correlation_id(correlation_id)
        .with_client_id(Some(StrBytes::from_static_str(CLIENT_ID)));

    let mut buf = BytesMut::new();
    buf.put_i32(0);

    header
        .encode(&mut buf, api_key.request_header_version(api_version))
        .map_err(|e| KafkaError::Protocol(format!("Failed to encode header: {:?}", e)))?;
    request
        .encode(&mut buf, api_version)
        .map_err(|e| KafkaError::Protocol(format!("Failed to encode request: {:?}", e)))?;

    let len = (buf.len() - 4) as i32;
    buf[0..4].copy_from_slice(&len.to_be_bytes());
    Ok(buf)
}
