//! One-shot SMTP RCPT-TO probe with per-stage timing.
//!
//! The dialog is a linear state machine: CONNECT, BANNER, EHLO (with a
//! single HELO retry), MAIL FROM, RCPT TO, then a fire-and-forget QUIT.
//! DATA is never issued. Every failure mode before RCPT TO, and any 4xx
//! at RCPT TO, maps to `unknown`; `rejected` is reserved for an explicit
//! 5xx and `accepted` for an explicit 2xx at RCPT TO.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::{ProbeStats, SmtpResult, SmtpStatus, SmtpTiming};

pub const DEFAULT_SMTP_PORT: u16 = 25;
pub const DEFAULT_SMTP_TIMEOUT_MS: u64 = 10_000;
/// Probes in a timing-stats run.
pub const DEFAULT_TIMING_PROBES: usize = 2;
/// Pause between sequential probes of the same recipient.
const INTER_PROBE_PAUSE: Duration = Duration::from_millis(100);
const QUIT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
enum DialogError {
    #[error("connection closed by peer")]
    Closed,
    #[error("timed out waiting for {0} response")]
    Timeout(&'static str),
    #[error("malformed response line: {0}")]
    Malformed(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct SmtpReply {
    code: u16,
    message: String,
}

impl SmtpReply {
    fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }
}

fn ms_since(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn sender_domain(sender_email: &str) -> &str {
    sender_email
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost")
}

fn non_empty(message: String) -> Option<String> {
    if message.is_empty() {
        None
    } else {
        Some(message)
    }
}

fn unknown(
    code: Option<u16>,
    message: String,
    started: Instant,
    timing: Option<SmtpTiming>,
) -> SmtpResult {
    let total = ms_since(started);
    let timing = timing.map(|mut timing| {
        timing.total = total;
        timing
    });
    SmtpResult {
        status: SmtpStatus::Unknown,
        response_code: code,
        response_message: non_empty(message),
        response_time: total,
        timing,
    }
}

/// Read one complete (possibly multi-line) SMTP reply.
///
/// Lines are read up to CRLF; a reply ends at the first line whose
/// three-digit code is followed by a space (or nothing), per the RFC 5321
/// continuation rule.
async fn read_reply(
    conn: &mut BufReader<TcpStream>,
    per_op: Duration,
    stage: &'static str,
) -> Result<SmtpReply, DialogError> {
    let mut line = String::new();
    loop {
        line.clear();
        match timeout(per_op, conn.read_line(&mut line)).await {
            Ok(Ok(0)) => return Err(DialogError::Closed),
            Ok(Ok(_)) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.is_empty() {
                    continue;
                }
                let code: u16 = trimmed
                    .get(..3)
                    .and_then(|digits| digits.parse().ok())
                    .ok_or_else(|| DialogError::Malformed(trimmed.to_string()))?;
                let last = trimmed.len() == 3 || trimmed.as_bytes().get(3) == Some(&b' ');
                if last {
                    let message = trimmed.get(4..).unwrap_or("").trim().to_string();
                    return Ok(SmtpReply { code, message });
                }
                // continuation line ("NNN-"): keep reading
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(DialogError::Timeout(stage)),
        }
    }
}

async fn send_command(
    conn: &mut BufReader<TcpStream>,
    command: &str,
    per_op: Duration,
) -> Result<(), DialogError> {
    let data = format!("{command}\r\n");
    match timeout(per_op, conn.get_mut().write_all(data.as_bytes())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(DialogError::Timeout("write")),
    }
}

async fn exchange(
    conn: &mut BufReader<TcpStream>,
    command: &str,
    per_op: Duration,
    stage: &'static str,
) -> Result<SmtpReply, DialogError> {
    send_command(conn, command, per_op).await?;
    read_reply(conn, per_op, stage).await
}

/// Run the RCPT-TO dialog against a single MX host.
///
/// The socket is dropped on every exit path; the result carries the
/// response code and message observed at the failing stage, when any.
pub async fn smtp_probe(
    host: &str,
    port: u16,
    recipient: &str,
    sender_email: &str,
    timeout_ms: u64,
) -> SmtpResult {
    let per_op = Duration::from_millis(timeout_ms);
    let started = Instant::now();
    debug!("probing {recipient} via {host}:{port}");

    let connect_started = Instant::now();
    let stream = match timeout(per_op, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return unknown(None, format!("connect failed: {e}"), started, None),
        Err(_) => return unknown(None, "connect timed out".to_string(), started, None),
    };
    let mut timing = SmtpTiming {
        connect: ms_since(connect_started),
        ..Default::default()
    };
    let mut conn = BufReader::new(stream);

    let stage_started = Instant::now();
    let banner = match read_reply(&mut conn, per_op, "banner").await {
        Ok(reply) => reply,
        Err(e) => {
            timing.banner = ms_since(stage_started);
            return unknown(None, e.to_string(), started, Some(timing));
        }
    };
    timing.banner = ms_since(stage_started);
    if !banner.is_positive() {
        return unknown(Some(banner.code), banner.message, started, Some(timing));
    }

    // EHLO, retried once as HELO; both attempts share the ehlo slot
    let stage_started = Instant::now();
    let ehlo_command = format!("EHLO {}", sender_domain(sender_email));
    let mut greeting = match exchange(&mut conn, &ehlo_command, per_op, "EHLO").await {
        Ok(reply) => reply,
        Err(e) => {
            timing.ehlo = ms_since(stage_started);
            return unknown(None, e.to_string(), started, Some(timing));
        }
    };
    if !greeting.is_positive() {
        debug!("EHLO rejected with {}, retrying as HELO", greeting.code);
        greeting = match exchange(&mut conn, "HELO localhost", per_op, "HELO").await {
            Ok(reply) => reply,
            Err(e) => {
                timing.ehlo = ms_since(stage_started);
                return unknown(None, e.to_string(), started, Some(timing));
            }
        };
    }
    timing.ehlo = ms_since(stage_started);
    if !greeting.is_positive() {
        return unknown(Some(greeting.code), greeting.message, started, Some(timing));
    }

    let stage_started = Instant::now();
    let mail = match exchange(
        &mut conn,
        &format!("MAIL FROM:<{sender_email}>"),
        per_op,
        "MAIL FROM",
    )
    .await
    {
        Ok(reply) => reply,
        Err(e) => {
            timing.mail_from = ms_since(stage_started);
            return unknown(None, e.to_string(), started, Some(timing));
        }
    };
    timing.mail_from = ms_since(stage_started);
    if !mail.is_positive() {
        return unknown(Some(mail.code), mail.message, started, Some(timing));
    }

    let stage_started = Instant::now();
    let rcpt = match exchange(
        &mut conn,
        &format!("RCPT TO:<{recipient}>"),
        per_op,
        "RCPT TO",
    )
    .await
    {
        Ok(reply) => reply,
        Err(e) => {
            timing.rcpt_to = ms_since(stage_started);
            return unknown(None, e.to_string(), started, Some(timing));
        }
    };
    timing.rcpt_to = ms_since(stage_started);

    // fire-and-forget; errors here carry no signal
    let _ = timeout(QUIT_TIMEOUT, conn.get_mut().write_all(b"QUIT\r\n")).await;

    timing.total = ms_since(started);
    let status = if rcpt.is_positive() {
        SmtpStatus::Accepted
    } else if rcpt.is_permanent_failure() {
        SmtpStatus::Rejected
    } else {
        SmtpStatus::Unknown
    };
    debug!(
        "probe of {recipient} via {host} finished: {:?} ({})",
        status, rcpt.code
    );
    SmtpResult {
        status,
        response_code: Some(rcpt.code),
        response_message: non_empty(rcpt.message),
        response_time: timing.total,
        timing: Some(timing),
    }
}

/// Probe MX hosts in order, returning on the first decisive answer.
///
/// `unknown` moves on to the next host; when every host is inconclusive
/// the last `unknown` result is returned.
pub async fn probe_with_fallback(
    hosts: &[String],
    port: u16,
    recipient: &str,
    sender_email: &str,
    timeout_ms: u64,
) -> SmtpResult {
    let mut last: Option<SmtpResult> = None;
    for host in hosts {
        let result = smtp_probe(host, port, recipient, sender_email, timeout_ms).await;
        match result.status {
            SmtpStatus::Accepted | SmtpStatus::Rejected => return result,
            _ => last = Some(result),
        }
    }
    last.unwrap_or_else(|| unknown(None, "no MX hosts to probe".to_string(), Instant::now(), None))
}

/// Run `probes` sequential fallback probes of the same recipient with a
/// short pause between them, and aggregate RCPT-TO latencies.
///
/// The reported result is the last non-unknown one if any, else the
/// final unknown. Averages cover probes whose RCPT-TO stage actually
/// produced a measurable latency.
pub async fn probe_with_timing_stats(
    hosts: &[String],
    port: u16,
    recipient: &str,
    sender_email: &str,
    timeout_ms: u64,
    probes: usize,
) -> ProbeStats {
    let probes = probes.max(1);
    let mut timings: Vec<SmtpTiming> = Vec::with_capacity(probes);
    let mut decisive: Option<SmtpResult> = None;
    let mut last: Option<SmtpResult> = None;

    for attempt in 0..probes {
        if attempt > 0 {
            sleep(INTER_PROBE_PAUSE).await;
        }
        let result = probe_with_fallback(hosts, port, recipient, sender_email, timeout_ms).await;
        if let Some(timing) = result.timing {
            timings.push(timing);
        }
        if result.status != SmtpStatus::Unknown {
            decisive = Some(result.clone());
        }
        last = Some(result);
    }

    let result = decisive
        .or(last)
        .unwrap_or_else(|| unknown(None, "no probes were run".to_string(), Instant::now(), None));

    let rcpt_times: Vec<u64> = timings
        .iter()
        .map(|timing| timing.rcpt_to)
        .filter(|&ms| ms > 0)
        .collect();
    let (avg, min, max) = if rcpt_times.is_empty() {
        (0.0, 0, 0)
    } else {
        let sum: u64 = rcpt_times.iter().sum();
        (
            sum as f64 / rcpt_times.len() as f64,
            *rcpt_times.iter().min().unwrap_or(&0),
            *rcpt_times.iter().max().unwrap_or(&0),
        )
    };

    ProbeStats {
        result,
        timings,
        avg_rcpt_to_ms: avg,
        min_rcpt_to_ms: min,
        max_rcpt_to_ms: max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    type Script = Vec<(&'static str, &'static str)>;

    /// Loopback SMTP server that answers `connections` sequential dialogs
    /// from a prefix-matched reply script.
    async fn mock_mx(banner: &'static str, scripts: Vec<Script>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for script in scripts {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let mut conn = BufReader::new(stream);
                if conn.get_mut().write_all(banner.as_bytes()).await.is_err() {
                    continue;
                }
                let mut line = String::new();
                loop {
                    line.clear();
                    match conn.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let command = line.trim().to_ascii_uppercase();
                            if command.starts_with("QUIT") {
                                break;
                            }
                            let reply = script
                                .iter()
                                .find(|(prefix, _)| command.starts_with(prefix))
                                .map(|(_, reply)| *reply)
                                .unwrap_or("250 ok\r\n");
                            if conn.get_mut().write_all(reply.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });
        addr
    }

    fn accepting_script() -> Script {
        vec![
            ("EHLO", "250-mx.test\r\n250-SIZE 35882577\r\n250 8BITMIME\r\n"),
            ("MAIL", "250 2.1.0 Ok\r\n"),
            ("RCPT", "250 2.1.5 Ok\r\n"),
        ]
    }

    #[tokio::test]
    async fn accepts_with_multiline_ehlo_reply() {
        let addr = mock_mx("220 mx.test ESMTP\r\n", vec![accepting_script()]).await;
        let result = smtp_probe(
            &addr.ip().to_string(),
            addr.port(),
            "user@example.com",
            "probe@verifier.test",
            2_000,
        )
        .await;

        assert_eq!(result.status, SmtpStatus::Accepted);
        assert_eq!(result.response_code, Some(250));
        let timing = result.timing.expect("timing recorded");
        assert!(timing.total >= timing.rcpt_to);
    }

    #[tokio::test]
    async fn maps_rcpt_5xx_to_rejected() {
        let script = vec![
            ("EHLO", "250 mx.test\r\n"),
            ("MAIL", "250 2.1.0 Ok\r\n"),
            ("RCPT", "550 5.1.1 User unknown\r\n"),
        ];
        let addr = mock_mx("220 mx.test ESMTP\r\n", vec![script]).await;
        let result = smtp_probe(
            &addr.ip().to_string(),
            addr.port(),
            "ghost@example.com",
            "probe@verifier.test",
            2_000,
        )
        .await;

        assert_eq!(result.status, SmtpStatus::Rejected);
        assert_eq!(result.response_code, Some(550));
        assert!(result
            .response_message
            .as_deref()
            .unwrap_or_default()
            .contains("User unknown"));
    }

    #[tokio::test]
    async fn maps_rcpt_4xx_to_unknown() {
        let script = vec![
            ("EHLO", "250 mx.test\r\n"),
            ("MAIL", "250 2.1.0 Ok\r\n"),
            ("RCPT", "451 4.7.1 Greylisted, try again later\r\n"),
        ];
        let addr = mock_mx("220 mx.test ESMTP\r\n", vec![script]).await;
        let result = smtp_probe(
            &addr.ip().to_string(),
            addr.port(),
            "user@example.com",
            "probe@verifier.test",
            2_000,
        )
        .await;

        assert_eq!(result.status, SmtpStatus::Unknown);
        assert_eq!(result.response_code, Some(451));
    }

    #[tokio::test]
    async fn retries_rejected_ehlo_as_helo() {
        let script = vec![
            ("EHLO", "502 5.5.2 Error: command not recognized\r\n"),
            ("HELO", "250 mx.test\r\n"),
            ("MAIL", "250 2.1.0 Ok\r\n"),
            ("RCPT", "250 2.1.5 Ok\r\n"),
        ];
        let addr = mock_mx("220 mx.test ESMTP\r\n", vec![script]).await;
        let result = smtp_probe(
            &addr.ip().to_string(),
            addr.port(),
            "user@example.com",
            "probe@verifier.test",
            2_000,
        )
        .await;

        assert_eq!(result.status, SmtpStatus::Accepted);
    }

    #[tokio::test]
    async fn negative_banner_is_unknown_with_carried_code() {
        let addr = mock_mx("554 No SMTP service here\r\n", vec![Vec::new()]).await;
        let result = smtp_probe(
            &addr.ip().to_string(),
            addr.port(),
            "user@example.com",
            "probe@verifier.test",
            2_000,
        )
        .await;

        assert_eq!(result.status, SmtpStatus::Unknown);
        assert_eq!(result.response_code, Some(554));
    }

    #[tokio::test]
    async fn connect_failure_is_unknown() {
        // bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = smtp_probe(
            &addr.ip().to_string(),
            addr.port(),
            "user@example.com",
            "probe@verifier.test",
            2_000,
        )
        .await;

        assert_eq!(result.status, SmtpStatus::Unknown);
        assert_eq!(result.response_code, None);
        assert!(result.response_message.is_some());
    }

    #[tokio::test]
    async fn fallback_moves_past_inconclusive_hosts() {
        let live = mock_mx("220 mx.test ESMTP\r\n", vec![accepting_script()]).await;

        // nothing listens on 127.0.0.2 at this port, so the first host is
        // refused and the fallback reaches the live listener
        let hosts = vec!["127.0.0.2".to_string(), live.ip().to_string()];
        let result = probe_with_fallback(
            &hosts,
            live.port(),
            "user@example.com",
            "probe@verifier.test",
            1_000,
        )
        .await;
        assert_eq!(result.status, SmtpStatus::Accepted);
    }

    #[tokio::test]
    async fn fallback_returns_last_unknown_when_all_hosts_fail() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let hosts = vec!["127.0.0.2".to_string(), dead.ip().to_string()];
        let result = probe_with_fallback(
            &hosts,
            dead.port(),
            "user@example.com",
            "probe@verifier.test",
            1_000,
        )
        .await;
        assert_eq!(result.status, SmtpStatus::Unknown);
        assert!(result.response_message.is_some());
    }

    #[tokio::test]
    async fn timing_stats_aggregates_sequential_probes() {
        let addr = mock_mx(
            "220 mx.test ESMTP\r\n",
            vec![accepting_script(), accepting_script()],
        )
        .await;

        let stats = probe_with_timing_stats(
            &[addr.ip().to_string()],
            addr.port(),
            "user@example.com",
            "probe@verifier.test",
            2_000,
            2,
        )
        .await;

        assert_eq!(stats.result.status, SmtpStatus::Accepted);
        assert_eq!(stats.timings.len(), 2);
        assert!(stats.min_rcpt_to_ms <= stats.max_rcpt_to_ms);
        if stats.avg_rcpt_to_ms > 0.0 {
            assert!(stats.avg_rcpt_to_ms >= stats.min_rcpt_to_ms as f64);
            assert!(stats.avg_rcpt_to_ms <= stats.max_rcpt_to_ms as f64);
        }
    }

    #[tokio::test]
    async fn timing_stats_keeps_last_decisive_result() {
        // first dialog rejects, second greylists: the rejection is reported
        let reject = vec![
            ("EHLO", "250 mx.test\r\n"),
            ("MAIL", "250 2.1.0 Ok\r\n"),
            ("RCPT", "550 5.1.1 User unknown\r\n"),
        ];
        let greylist = vec![
            ("EHLO", "250 mx.test\r\n"),
            ("MAIL", "250 2.1.0 Ok\r\n"),
            ("RCPT", "451 4.7.1 Greylisted\r\n"),
        ];
        let addr = mock_mx("220 mx.test ESMTP\r\n", vec![reject, greylist]).await;

        let stats = probe_with_timing_stats(
            &[addr.ip().to_string()],
            addr.port(),
            "ghost@example.com",
            "probe@verifier.test",
            2_000,
            2,
        )
        .await;

        assert_eq!(stats.result.status, SmtpStatus::Rejected);
        assert_eq!(stats.result.response_code, Some(550));
    }

    #[test]
    fn derives_ehlo_domain_from_sender() {
        assert_eq!(sender_domain("probe@verifier.test"), "verifier.test");
        assert_eq!(sender_domain("no-at-sign"), "localhost");
        assert_eq!(sender_domain("dangling@"), "localhost");
    }
}
