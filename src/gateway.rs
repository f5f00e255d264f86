// Booking gateway: the payment + reservation boundary the wizard submits to

use crate::config::{BookingConfig, RetryConfig};
use crate::reference::BookingReference;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Booking rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Submission timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Network(_) | PaymentError::Timeout(_) => true,
            PaymentError::Rejected { status, .. } => *status >= 500 || *status == 429,
            PaymentError::InvalidResponse(_) => false,
        }
    }
}

// What the wizard hands over once the guest confirms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSubmission {
    pub reference: BookingReference,
    pub room_id: String,
    pub room_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: u32,
    pub guest_count: u32,
    pub guest_name: String,
    pub guest_email: String,
    pub guest_phone: String,
    pub final_price: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    #[serde(flatten)]
    pub booking: BookingSubmission,
    pub timestamp: DateTime<Utc>,
}

impl BookingRecord {
    pub fn from_submission(booking: BookingSubmission, timestamp: DateTime<Utc>) -> Self {
        Self { booking, timestamp }
    }

    pub fn reference(&self) -> &BookingReference {
        &self.booking.reference
    }
}

#[async_trait]
pub trait BookingGateway: Send + Sync + 'static {
    // Charge and persist the booking. An error leaves nothing confirmed.
    async fn submit_booking(
        &self,
        submission: BookingSubmission,
    ) -> Result<BookingRecord, PaymentError>;
}

/// Stand-in gateway: waits out a fixed processing delay and records the booking in memory.
///
/// Failures can be injected for the next N submissions, which is how the
/// wizard's payment failure path is exercised without a backend.
pub struct SimulatedGateway {
    delay: Duration,
    fail_next: AtomicUsize,
    reject_next: AtomicUsize,
    submission_count: AtomicUsize,
    history: Mutex<Vec<BookingRecord>>,
}

impl SimulatedGateway {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_next: AtomicUsize::new(0),
            reject_next: AtomicUsize::new(0),
            submission_count: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &BookingConfig) -> Self {
        Self::new(config.processing_delay())
    }

    // Next `count` submissions fail with a network error
    pub fn fail_next_submissions(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    // Next `count` submissions are declined by the "processor"
    pub fn reject_next_submissions(&self, count: usize) {
        self.reject_next.store(count, Ordering::SeqCst);
    }

    pub fn submission_count(&self) -> usize {
        self.submission_count.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<BookingRecord> {
        self.history.lock().clone()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BookingGateway for SimulatedGateway {
    async fn submit_booking(
        &self,
        submission: BookingSubmission,
    ) -> Result<BookingRecord, PaymentError> {
        self.submission_count.fetch_add(1, Ordering::SeqCst);
        debug!(reference = %submission.reference, delay_ms = self.delay.as_millis() as u64, "Simulating payment");

        sleep(self.delay).await;

        if take_one(&self.fail_next) {
            return Err(PaymentError::Network("Service unavailable".to_string()));
        }
        if take_one(&self.reject_next) {
            return Err(PaymentError::Rejected {
                status: 402,
                message: "Payment declined".to_string(),
            });
        }

        let record = BookingRecord::from_submission(submission, Utc::now());
        info!(
            reference = %record.booking.reference,
            room_id = %record.booking.room_id,
            nights = record.booking.nights,
            final_price = record.booking.final_price,
            "Booking recorded"
        );
        self.history.lock().push(record.clone());
        Ok(record)
    }
}

/// Submits bookings to a reservations API as JSON.
pub struct HttpGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    retry_config: RetryConfig,
    request_timeout: Duration,
    attempts: AtomicUsize,
}

impl HttpGateway {
    pub fn new(config: &BookingConfig) -> Result<Self, PaymentError> {
        let request_timeout = config.retry_config.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PaymentError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/bookings", config.reservations_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            retry_config: config.retry_config.clone(),
            request_timeout,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    // Total HTTP attempts made, retries included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn send(&self, record: &BookingRecord) -> Result<BookingRecord, PaymentError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", record.booking.reference.as_str())
            .json(record);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            return Err(PaymentError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        if body.trim().is_empty() {
            return Ok(record.clone());
        }
        match serde_json::from_str::<BookingRecord>(&body) {
            Ok(confirmed) => Ok(confirmed),
            Err(e) => {
                debug!(error = %e, "Response body is not a booking record, keeping local record");
                Ok(record.clone())
            }
        }
    }

    fn map_error(&self, error: reqwest::Error) -> PaymentError {
        if error.is_timeout() {
            PaymentError::Timeout(self.request_timeout.as_millis() as u64)
        } else {
            PaymentError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl BookingGateway for HttpGateway {
    async fn submit_booking(
        &self,
        submission: BookingSubmission,
    ) -> Result<BookingRecord, PaymentError> {
        let record = BookingRecord::from_submission(submission, Utc::now());
        let mut attempt = 0;

        loop {
            match self.send(&record).await {
                Ok(confirmed) => {
                    info!(reference = %confirmed.booking.reference, attempt, "Booking accepted");
                    return Ok(confirmed);
                }
                Err(e) if e.is_retryable() && attempt < self.retry_config.max_retries => {
                    let backoff = backoff_delay(attempt, &self.retry_config);
                    warn!(
                        reference = %record.booking.reference,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Booking submission failed, retrying"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(reference = %record.booking.reference, error = %e, "Booking submission failed");
                    return Err(e);
                }
            }
        }
    }
}

// Capped doubling delay, spread by up to +/- `jitter` of itself
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let ceiling = config.backoff_ceiling_ms(attempt) as f64;
    let spread = if config.jitter > 0.0 {
        rand::thread_rng().gen_range(-config.jitter..=config.jitter)
    } else {
        0.0
    };
    Duration::from_millis((ceiling * (1.0 + spread)).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn submission() -> BookingSubmission {
        BookingSubmission {
            reference: BookingReference::from_parts("645", 1_736_500_000_000),
            room_id: "deluxe-suite".to_string(),
            room_name: "Deluxe Suite".to_string(),
            check_in: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 1, 13).unwrap(),
            nights: 3,
            guest_count: 2,
            guest_name: "Ada Obi".to_string(),
            guest_email: "ada@example.com".to_string(),
            guest_phone: "+2348000000000".to_string(),
            final_price: 141750,
        }
    }

    fn fast_retries(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            request_timeout_ms: 1000,
            backoff_base_ms: 1,
            backoff_cap_ms: 5,
            jitter: 0.1,
        }
    }

    // Reads one HTTP request (headers plus Content-Length body)
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    // Serves the scripted (status line, body) responses in order, one per connection
    async fn spawn_server(
        responses: Vec<(&'static str, String)>,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                seen.lock().push(request);
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        (url, requests)
    }

    // First connection gets no answer; the second gets `reply`
    async fn spawn_stalling_server(reply: (&'static str, String)) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut stalled, _) = listener.accept().await.unwrap();
            read_request(&mut stalled).await;

            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            let (status, body) = reply;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            drop(stalled);
        });

        url
    }

    fn http_config(url: &str, retry_config: RetryConfig) -> BookingConfig {
        BookingConfig {
            reservations_url: url.to_string(),
            api_key: Some("test_key".to_string()),
            submission_timeout_ms: 5000,
            retry_config,
            ..BookingConfig::default()
        }
    }

    #[test]
    fn test_payment_error_retryable() {
        assert!(PaymentError::Network("reset".to_string()).is_retryable());
        assert!(PaymentError::Timeout(100).is_retryable());
        assert!(PaymentError::Rejected {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(PaymentError::Rejected {
            status: 429,
            message: String::new()
        }
        .is_retryable());
        assert!(!PaymentError::Rejected {
            status: 402,
            message: String::new()
        }
        .is_retryable());
        assert!(!PaymentError::InvalidResponse("garbage".to_string()).is_retryable());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = BookingRecord::from_submission(submission(), Utc::now());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["reference"], "645-M5QJ9JB4");
        assert_eq!(json["roomId"], "deluxe-suite");
        assert_eq!(json["checkIn"], "2025-01-10");
        assert_eq!(json["guestCount"], 2);
        assert_eq!(json["finalPrice"], 141750);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_backoff_delay_bounds() {
        let config = RetryConfig::default();
        for attempt in 0..10 {
            let delay = backoff_delay(attempt, &config).as_millis() as f64;
            let ceiling = config.backoff_ceiling_ms(attempt) as f64;
            assert!(delay >= ceiling * 0.8 - 1.0, "attempt {}: {}", attempt, delay);
            assert!(delay <= ceiling * 1.2 + 1.0, "attempt {}: {}", attempt, delay);
        }

        let exact = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(2, &exact), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_gateway_waits_and_records() {
        let gateway = SimulatedGateway::new(Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let record = gateway.submit_booking(submission()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(record.booking, submission());
        assert_eq!(gateway.submitted(), vec![record]);
        assert_eq!(gateway.submission_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_gateway_injected_failures() {
        let gateway = SimulatedGateway::new(Duration::from_millis(10));
        gateway.fail_next_submissions(1);
        gateway.reject_next_submissions(1);

        assert!(matches!(
            gateway.submit_booking(submission()).await,
            Err(PaymentError::Network(_))
        ));
        assert_eq!(
            gateway.submit_booking(submission()).await,
            Err(PaymentError::Rejected {
                status: 402,
                message: "Payment declined".to_string()
            })
        );
        assert!(gateway.submit_booking(submission()).await.is_ok());

        assert_eq!(gateway.submission_count(), 3);
        assert_eq!(gateway.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_http_gateway_posts_record() {
        let confirmed = BookingRecord::from_submission(submission(), Utc::now());
        let (url, requests) = spawn_server(vec![(
            "201 Created",
            serde_json::to_string(&confirmed).unwrap(),
        )])
        .await;

        let gateway = HttpGateway::new(&http_config(&url, fast_retries(0))).unwrap();
        assert!(gateway.endpoint().ends_with("/api/bookings"));

        let record = gateway.submit_booking(submission()).await.unwrap();
        assert_eq!(record, confirmed);

        let requests = requests.lock();
        assert_eq!(requests.len(), 1);
        let request = requests[0].to_lowercase();
        assert!(request.starts_with("post /api/bookings"));
        assert!(request.contains("idempotency-key: 645-m5qj9jb4"));
        assert!(request.contains("authorization: bearer test_key"));
        assert!(requests[0].contains("\"guestName\":\"Ada Obi\""));
    }

    #[tokio::test]
    async fn test_http_gateway_retries_server_errors() {
        let (url, requests) = spawn_server(vec![
            ("503 Service Unavailable", "busy".to_string()),
            ("201 Created", String::new()),
        ])
        .await;

        let gateway = HttpGateway::new(&http_config(&url, fast_retries(2))).unwrap();
        let record = gateway.submit_booking(submission()).await.unwrap();

        // empty body: the locally assembled record stands
        assert_eq!(record.booking, submission());
        assert_eq!(gateway.attempts(), 2);
        assert_eq!(requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_http_gateway_does_not_retry_rejections() {
        let (url, _requests) = spawn_server(vec![(
            "422 Unprocessable Entity",
            "room sold out".to_string(),
        )])
        .await;

        let gateway = HttpGateway::new(&http_config(&url, fast_retries(3))).unwrap();
        let result = gateway.submit_booking(submission()).await;

        assert_eq!(
            result,
            Err(PaymentError::Rejected {
                status: 422,
                message: "room sold out".to_string()
            })
        );
        assert_eq!(gateway.attempts(), 1);
    }

    #[tokio::test]
    async fn test_http_gateway_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        drop(listener);

        let gateway = HttpGateway::new(&http_config(&url, fast_retries(1))).unwrap();
        let result = gateway.submit_booking(submission()).await;

        assert!(matches!(result, Err(PaymentError::Network(_))));
        assert_eq!(gateway.attempts(), 2);
    }

    #[tokio::test]
    async fn test_wizard_confirms_after_request_timeout_retry() {
        use crate::catalog::RoomCatalog;
        use crate::wizard::{BookingWizard, FixedClock, WizardStep};

        let url = spawn_stalling_server(("201 Created", String::new())).await;
        let config = BookingConfig {
            submission_timeout_ms: 3000,
            retry_config: RetryConfig {
                request_timeout_ms: 200,
                ..fast_retries(3)
            },
            ..http_config(&url, fast_retries(3))
        };
        assert!(config.validate().is_ok());

        let gateway = Arc::new(HttpGateway::new(&config).unwrap());
        let room = RoomCatalog::builtin()
            .unwrap()
            .get("deluxe-suite")
            .unwrap()
            .clone();
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut wizard =
            BookingWizard::with_clock(room, gateway.clone(), config, Arc::new(FixedClock(today)))
                .unwrap();

        wizard
            .set_check_in(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
            .unwrap();
        wizard.advance().await.unwrap();
        wizard
            .set_guest_details("Ada Obi", "ada@example.com", "+2348000000000")
            .unwrap();
        wizard.advance().await.unwrap();

        assert_eq!(wizard.advance().await, Ok(WizardStep::Confirmation));
        assert_eq!(gateway.attempts(), 2);
        assert!(wizard.last_error().is_none());
        assert!(wizard.record().is_some());
    }
}
