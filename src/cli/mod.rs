// SPDX-License-Identifier: MIT
//! Interactive terminal shell.
//!
//! A line-oriented front end over [`SessionController`]: chat with the
//! assessment service, complete triage, then watch the queue and answer
//! check-in prompts — all in one loop that races stdin against the
//! runtime's notice stream.
//!
//! Everything here is presentation. Protocol behavior (deadlines,
//! exactly-once submission, reconciliation) lives in the library and is
//! driven through the controller only.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::api::http::HttpTriageApi;
use crate::api::{CheckInValue, QueueEntry};
use crate::chat::FALLBACK_REPLY;
use crate::config::ClientConfig;
use crate::queue::SeverityLevel;
use crate::realtime::transport::WsPushTransport;
use crate::realtime::{ConnectionState, RealtimeChannel};
use crate::session::notice::Notice;
use crate::session::{SessionController, SessionState};

/// Options for the interactive shell.
#[derive(Debug, Default)]
pub struct ShellOpts {
    /// Patient name (optional).
    pub name: Option<String>,
    /// Patient phone number (optional).
    pub phone: Option<String>,
}

/// Entry point for the interactive triage flow.
pub async fn run_shell(config: Arc<ClientConfig>, opts: ShellOpts) -> Result<()> {
    let api = Arc::new(HttpTriageApi::new(config.api_url.clone()));
    let realtime = RealtimeChannel::new(Arc::new(WsPushTransport::new(Arc::clone(&config))));
    let controller = SessionController::new(api, realtime, config);
    let mut notices = controller.notices().subscribe();

    println!("MediQueue — AI-powered hospital triage");
    controller
        .start(opts.name.as_deref(), opts.phone.as_deref())
        .await
        .context("failed to start triage — is the service reachable?")?;

    for message in controller.chat_log().await {
        println!("assistant: {}", message.text);
    }
    println!("(describe your symptoms; /done to finish, /queue to view the queue, /lower to move down, /quit to leave)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shell = Shell {
        controller: &controller,
        last_position: None,
        awaiting_lower_confirm: false,
    };

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !shell.handle_line(line.trim()).await {
                        break;
                    }
                }
                None => break, // stdin closed
            },
            notice = notices.recv() => match notice {
                Ok(notice) => shell.render_notice(notice).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "shell: notice stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    controller.close().await;
    println!("Goodbye.");
    Ok(())
}

struct Shell<'a> {
    controller: &'a SessionController,
    last_position: Option<u32>,
    awaiting_lower_confirm: bool,
}

impl Shell<'_> {
    /// Handle one input line. Returns `false` to leave the loop.
    async fn handle_line(&mut self, line: &str) -> bool {
        if self.awaiting_lower_confirm {
            self.awaiting_lower_confirm = false;
            if line.eq_ignore_ascii_case("yes") {
                match self.controller.lower_position().await {
                    Ok(()) => println!("Your position has been lowered."),
                    Err(e) => println!("Failed to lower position: {e}. Please try again."),
                }
            } else {
                println!("Not confirmed — your position is unchanged.");
            }
            return true;
        }

        match line {
            "" => true,
            "/quit" | "/exit" => false,
            "/done" => {
                self.complete_triage().await;
                true
            }
            "/queue" => {
                self.print_queue().await;
                true
            }
            "/lower" => {
                println!("Lower your queue position? Others will be seen before you. Type 'yes' to confirm:");
                self.awaiting_lower_confirm = true;
                true
            }
            _ => {
                // A bare better/same/worse answers an open check-in prompt.
                if let Some(value) = CheckInValue::parse(line) {
                    if self.controller.open_check_in().await.is_some() {
                        self.controller.respond_check_in(value).await;
                        return true;
                    }
                }
                self.send_chat(line).await;
                true
            }
        }
    }

    async fn send_chat(&self, text: &str) {
        match self.controller.send_message(text).await {
            Ok(reply) => println!("assistant: {reply}"),
            Err(e) if e.is_benign() => debug!(err = %e, "shell: send ignored"),
            Err(_) => println!("assistant: {FALLBACK_REPLY}"),
        }
    }

    async fn complete_triage(&self) {
        if self.controller.state().await != SessionState::Chatting {
            return;
        }
        println!("Analyzing your assessment…");
        if self.controller.complete().await.is_err() {
            println!("Could not complete the assessment. Please try /done again.");
            return;
        }
        let Some(outcome) = self.controller.outcome().await else {
            return;
        };
        println!("Assessment complete.");
        println!(
            "  Severity: {:.1}/10 ({})",
            outcome.triage_result.severity_score,
            SeverityLevel::from_score(outcome.triage_result.severity_score)
        );
        println!("  Reasoning: {}", outcome.triage_result.severity_reasoning);
        println!("  Home guidance: {}", outcome.triage_result.home_guidance);
        println!("  Recommendation: {}", outcome.care_recommendation);
        println!(
            "You are in the queue at position {}. We'll keep this view updated.",
            outcome.queue_position
        );
    }

    async fn print_queue(&self) {
        let Some(snapshot) = self.controller.queue_snapshot().await else {
            println!("Not in the queue yet — finish the assessment with /done first.");
            return;
        };
        let mine = self.controller.session().await.map(|s| s.user_id);
        print_queue_table(&snapshot.entries, mine.as_deref());
    }

    async fn render_notice(&mut self, notice: Notice) {
        match notice {
            Notice::EmergencyAlert {
                care_recommendation,
            } => {
                println!("==============================================");
                println!("EMERGENCY DETECTED: {care_recommendation}");
                println!("==============================================");
            }
            Notice::MisuseWarning(warning) => println!("Warning: {warning}"),
            Notice::CheckInOpened { message } => {
                println!("CHECK-IN: {message}");
                println!("(reply 'better', 'same', or 'worse' within 5 minutes)");
            }
            Notice::CheckInRecorded { value } => {
                println!(
                    "Thank you for your response ({value}). Your check-in has been recorded."
                );
            }
            Notice::CheckInReopened => {
                println!("Failed to submit check-in response. Please try again.");
            }
            Notice::CheckInClosed => debug!("shell: check-in dismissed"),
            Notice::QueueUpdated { .. } => {
                if let Some(entry) = self.controller.my_queue_entry().await {
                    if self.last_position != Some(entry.position) {
                        self.last_position = Some(entry.position);
                        println!(
                            "Your position: {} (severity {}, wait ~{} min)",
                            entry.position,
                            SeverityLevel::from_score(entry.severity_score),
                            entry.wait_time_minutes.round() as i64,
                        );
                    }
                }
            }
            Notice::TransportFailure { action, detail } => {
                println!("Request failed ({action}): {detail}. Please try again.");
            }
            Notice::Realtime(ConnectionState::Connected) => debug!("shell: push connected"),
            Notice::Realtime(ConnectionState::Disconnected) => {
                println!("(connection to the clinic lost — reconnecting)");
            }
            Notice::StateChanged(state) => debug!(state = %state, "shell: session state"),
        }
    }
}

/// One-shot queue view (`mediq queue`).
pub async fn run_queue_once(config: Arc<ClientConfig>) -> Result<()> {
    let api = HttpTriageApi::new(config.api_url.clone());
    let entries = crate::api::TriageApi::get_queue(&api)
        .await
        .context("failed to fetch the queue")?;
    print_queue_table(&entries, None);
    Ok(())
}

fn print_queue_table(entries: &[QueueEntry], mine: Option<&str>) {
    if entries.is_empty() {
        println!("No one in queue.");
        return;
    }
    println!("{:<10} {:<10} {:>10}", "Position", "Severity", "Wait");
    for entry in entries {
        let marker = if mine == Some(entry.user_id.as_str()) {
            " <- you"
        } else {
            ""
        };
        println!(
            "{:<10} {:<10} {:>9}m{marker}",
            entry.position,
            SeverityLevel::from_score(entry.severity_score).to_string(),
            entry.wait_time_minutes.round() as i64,
        );
    }
}
