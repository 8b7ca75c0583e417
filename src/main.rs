//! Terminal receiving console.
//!
//! `inventory-hub <supplier> <invoice_no>` opens (or resumes) the receiving
//! session for one invoice. Every plain line is a scanned code, so a
//! keyboard-wedge scanner works out of the box. Lines starting with `:` are
//! commands; `:help` lists them.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

use inventory_hub_console::commands;
use inventory_hub_console::receiving::{
    Confirmation, FinalizeGate, PendingScan, ReceivingController, ReceivingWorkspace,
};
use inventory_hub_console::settings::Settings;
use inventory_hub_console::{init_logging, AppState};

const HELP: &str = "\
  <code>                 scan (EAN, SCM or product code)
  :qty N                 quantity for the next scan (negative corrects)
  :set ROW QTY [note]    set received quantity of row ROW (see :lines)
  :accept                accept every pending line as ordered
  :accept-all            accept every line as ordered
  :reset                 zero all received quantities (asks first)
  :pause                 pause the session and quit
  :finalize              finish receiving (asks when incomplete)
  :lines                 show invoice lines
  :diag                  show API request statistics
  :quit                  leave without pausing";

type Input = Lines<BufReader<Stdin>>;

fn print_lines(ws: &ReceivingWorkspace) {
    println!(
        "{:>4}  {:<16} {:<32} {:>8} {:>8}  {}",
        "row", "code", "title", "ordered", "received", "status"
    );
    for (index, line) in ws.lines.iter().enumerate() {
        let title: String = line.title.chars().take(32).collect();
        println!(
            "{:>4}  {:<16} {:<32} {:>8} {:>8}  {}",
            index + 1,
            line.display_code(),
            title,
            line.ordered_qty,
            line.received_qty,
            line.status.as_str()
        );
    }
    print_summary(ws);
}

fn print_summary(ws: &ReceivingWorkspace) {
    let s = &ws.summary;
    println!(
        "  matched {} | partial {} | pending {} | overage {} | unexpected {}",
        s.matched, s.partial, s.pending, s.overage, s.unexpected
    );
}

fn print_notice(ws: &ReceivingWorkspace) {
    if let Some(notice) = ws.notice.as_ref() {
        println!("  {}", notice.text);
    }
    if let Some(error) = ws.blocking_error.as_deref() {
        println!("  ! {error}");
    }
}

fn confirmation_text(confirmation: &Confirmation) -> &str {
    match confirmation {
        Confirmation::ResetAll { message } => message,
        Confirmation::Finalize { message, .. } => message,
    }
}

async fn ask_yes(input: &mut Input, prompt: &str) -> Result<bool> {
    println!("{prompt} [y/N]");
    let answer = input.next_line().await?.unwrap_or_default();
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "a" | "ano"
    ))
}

/// Print the outcome once the queued scan has been applied, without
/// blocking the prompt.
fn report_scan(controller: Arc<ReceivingController>, pending: PendingScan) {
    tokio::spawn(async move {
        match pending.outcome().await {
            Ok(outcome) => {
                let ws = controller.snapshot();
                let message = ws
                    .last_scan
                    .as_ref()
                    .filter(|last| last.code == outcome.code)
                    .map(|last| last.message.clone())
                    .unwrap_or_default();
                println!(
                    "  {} x{} -> {} {}",
                    outcome.code,
                    outcome.qty,
                    outcome.status.as_str(),
                    message
                );
                print_summary(&ws);
            }
            Err(e) => println!("  ! {e}"),
        }
    });
}

struct Console<'a> {
    state: &'a AppState,
    controller: Arc<ReceivingController>,
    input: Input,
    next_qty: f64,
}

impl Console<'_> {
    /// Handle one input line. `Ok(false)` ends the session loop.
    async fn handle(&mut self, line: &str) -> Result<bool> {
        let controller = self.controller.clone();
        let mut parts = line.split_whitespace();
        let head = parts.next().unwrap_or_default();

        match head {
            ":help" | ":h" => println!("{HELP}"),
            ":quit" | ":q" => return Ok(false),
            ":qty" => {
                let qty = parts
                    .next()
                    .and_then(|q| q.replace(',', ".").parse::<f64>().ok())
                    .ok_or_else(|| anyhow!("usage: :qty N"))?;
                self.next_qty = qty;
                controller.set_input_qty(qty);
                println!("  next scan quantity: {qty}");
            }
            ":set" => {
                let row = parts.next().and_then(|r| r.parse::<usize>().ok());
                let qty = parts
                    .next()
                    .and_then(|q| q.replace(',', ".").parse::<f64>().ok());
                let note = parts.collect::<Vec<_>>().join(" ");
                let (row, qty) = match (row, qty) {
                    (Some(row), Some(qty)) if row > 0 => (row, qty),
                    _ => bail!("usage: :set ROW QTY [note]"),
                };
                controller
                    .set_line_quantity(row - 1, qty, Some(&note))
                    .await?;
                print_lines(&controller.snapshot());
            }
            ":accept" | ":accept-all" => {
                let updated = controller.accept_all(head == ":accept").await?;
                let ws = controller.snapshot();
                print_notice(&ws);
                println!("  updated {updated} lines");
                print_summary(&ws);
            }
            ":reset" => {
                let confirmation = controller.request_reset_all()?;
                if ask_yes(&mut self.input, confirmation_text(&confirmation)).await? {
                    controller.confirm_reset_all().await?;
                    print_summary(&controller.snapshot());
                } else {
                    controller.cancel_confirmation();
                }
            }
            ":pause" => {
                let result = controller.pause().await?;
                let message = result
                    .message
                    .unwrap_or_else(|| format!("Príjem {} pozastavený", result.invoice_no));
                println!("  {message}");
                return Ok(false);
            }
            ":finalize" => {
                let result = match controller.request_finalize().await? {
                    FinalizeGate::Finalized { result } => result,
                    FinalizeGate::NeedsConfirmation { confirmation } => {
                        if !ask_yes(&mut self.input, confirmation_text(&confirmation)).await? {
                            controller.cancel_confirmation();
                            return Ok(true);
                        }
                        controller.confirm_finalize().await?
                    }
                };
                println!(
                    "  {} (ordered {}, received {})",
                    result.message.unwrap_or_else(|| "Príjem dokončený".into()),
                    result.total_ordered,
                    result.total_received
                );
                return Ok(false);
            }
            ":lines" => print_lines(&controller.snapshot()),
            ":diag" => {
                let requests = commands::invoke(self.state, "diagnostics_requests", None)
                    .await
                    .map_err(|e| anyhow!(e))?;
                println!("{}", serde_json::to_string_pretty(&requests["stats"])?);
                println!("  queue: {:?}", controller.queue_status());
            }
            other if other.starts_with(':') => bail!("unknown command {other}; try :help"),
            _ => {
                // Scanners may send codes with inner spaces; keep the whole line.
                if let Some(pending) = controller.enqueue_scan(line, self.next_qty).await? {
                    report_scan(controller.clone(), pending);
                    self.next_qty = 1.0;
                }
            }
        }
        Ok(true)
    }

    async fn run(&mut self) -> Result<()> {
        print_lines(&self.controller.snapshot());
        println!("Type :help for commands.");

        while let Some(raw) = self.input.next_line().await? {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            match self.handle(line).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "console command failed");
                    println!("  ! {e}");
                    print_notice(&self.controller.snapshot());
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load().context("loading settings")?;
    let _log_guard = init_logging(&settings);

    let mut args = std::env::args().skip(1);
    let supplier = args
        .next()
        .or_else(|| settings.console.default_supplier.clone())
        .ok_or_else(|| anyhow!("usage: inventory-hub <supplier> <invoice_no>"))?;
    let Some(invoice_no) = args.next() else {
        bail!("usage: inventory-hub <supplier> <invoice_no>");
    };

    let state = AppState::new(settings).context("creating API client")?;
    commands::invoke(
        &state,
        "receiving_open",
        Some(json!({ "supplier": supplier, "invoiceNo": invoice_no })),
    )
    .await
    .map_err(|e| anyhow!(e))
    .with_context(|| format!("opening receiving for {supplier}:{invoice_no}"))?;
    let controller = state.receiving().await.map_err(|e| anyhow!(e))?;
    info!(supplier = %supplier, invoice = %invoice_no, "console attached");

    let mut console = Console {
        state: &state,
        controller,
        input: BufReader::new(tokio::io::stdin()).lines(),
        next_qty: 1.0,
    };
    let outcome = console.run().await;
    drop(console);
    state.replace_receiving(None).await;
    outcome
}
