//! Invoice index table: filtering, paging, selection and the batch import
//! over the selected invoices.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clients::invoices::{
    CsvPreview, InvoiceIndexEntry, InvoiceStatus, InvoicesClient, PrepareStats,
};
use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Descending,
    Ascending,
}

/// What the receiving button on an invoice row does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "session_id", rename_all = "snake_case")]
pub enum ReceivingAction {
    Start,
    Resume(String),
    Reopen,
}

pub fn receiving_action(entry: &InvoiceIndexEntry) -> ReceivingAction {
    match entry.status {
        InvoiceStatus::Processed => ReceivingAction::Reopen,
        InvoiceStatus::InProgress => match entry
            .current_session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            Some(id) => ReceivingAction::Resume(id.to_string()),
            None => ReceivingAction::Start,
        },
        _ => ReceivingAction::Start,
    }
}

/// Path of the invoice CSV relative to the data root, as `/runs/prepare`
/// and `/files/preview` expect it.
pub fn data_relpath(supplier: &str, entry: &InvoiceIndexEntry) -> Option<String> {
    let rel = entry.relpath()?.trim_start_matches('/');
    if rel.starts_with("suppliers/") {
        return Some(rel.to_string());
    }
    let supplier = if entry.supplier.trim().is_empty() {
        supplier
    } else {
        entry.supplier.trim()
    };
    Some(format!("suppliers/{supplier}/{rel}"))
}

/// Natural-ish key so `F2` sorts before `F10`.
fn number_key(number: &str) -> (String, u64, String) {
    let split = number
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(number.len());
    let (prefix, rest) = number.split_at(split);
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, tail) = rest.split_at(digits_end);
    (
        prefix.to_ascii_lowercase(),
        digits.parse().unwrap_or(0),
        tail.to_string(),
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub invoice_no: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PrepareStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TablePage {
    pub page: usize,
    pub page_size: usize,
    pub page_count: usize,
    pub total: usize,
    pub rows: Vec<InvoiceIndexEntry>,
    pub selected: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InvoiceTable {
    supplier: String,
    entries: Vec<InvoiceIndexEntry>,
    text_filter: String,
    status_filter: Option<InvoiceStatus>,
    sort: SortOrder,
    page: usize,
    page_size: usize,
    selected: BTreeSet<String>,
}

impl InvoiceTable {
    pub fn new(supplier: impl Into<String>, entries: Vec<InvoiceIndexEntry>) -> Self {
        Self {
            supplier: supplier.into(),
            entries,
            text_filter: String::new(),
            status_filter: None,
            sort: SortOrder::default(),
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
            selected: BTreeSet::new(),
        }
    }

    pub async fn load(client: &InvoicesClient, supplier: &str) -> Result<Self, ApiError> {
        let index = client.index(supplier).await?;
        info!(supplier, count = index.invoices.len(), "invoice index loaded");
        Ok(Self::new(supplier, index.invoices))
    }

    pub fn supplier(&self) -> &str {
        &self.supplier
    }

    /// Swap in a fresh index, keeping filters and the selections that
    /// still exist.
    pub fn replace_entries(&mut self, entries: Vec<InvoiceIndexEntry>) {
        self.selected
            .retain(|id| entries.iter().any(|e| &e.invoice_id == id));
        self.entries = entries;
        self.clamp_page();
    }

    pub fn set_text_filter(&mut self, text: &str) {
        self.text_filter = text.trim().to_lowercase();
        self.page = 0;
    }

    pub fn set_status_filter(&mut self, status: Option<InvoiceStatus>) {
        self.status_filter = status;
        self.page = 0;
    }

    pub fn set_sort(&mut self, sort: SortOrder) {
        self.sort = sort;
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.clamp_page();
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page;
        self.clamp_page();
    }

    fn matches(&self, entry: &InvoiceIndexEntry) -> bool {
        if let Some(status) = &self.status_filter {
            if &entry.status != status {
                return false;
            }
        }
        self.text_filter.is_empty()
            || entry.invoice_no().to_lowercase().contains(&self.text_filter)
            || entry.invoice_id.to_lowercase().contains(&self.text_filter)
    }

    /// Filtered and sorted rows, before paging.
    pub fn visible(&self) -> Vec<&InvoiceIndexEntry> {
        let mut rows: Vec<&InvoiceIndexEntry> =
            self.entries.iter().filter(|e| self.matches(e)).collect();
        rows.sort_by(|a, b| {
            let ord = number_key(a.invoice_no()).cmp(&number_key(b.invoice_no()));
            match self.sort {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });
        rows
    }

    pub fn page_count(&self) -> usize {
        let total = self.visible().len();
        total.div_ceil(self.page_size).max(1)
    }

    fn clamp_page(&mut self) {
        let last = self.page_count() - 1;
        if self.page > last {
            self.page = last;
        }
    }

    pub fn current_page(&self) -> TablePage {
        let visible = self.visible();
        let total = visible.len();
        let page_count = total.div_ceil(self.page_size).max(1);
        let page = self.page.min(page_count - 1);
        let rows = visible
            .into_iter()
            .skip(page * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect();
        TablePage {
            page,
            page_size: self.page_size,
            page_count,
            total,
            rows,
            selected: self.selected.iter().cloned().collect(),
        }
    }

    /// Toggle selection by invoice id. Unknown ids are ignored.
    pub fn select(&mut self, invoice_id: &str, selected: bool) -> bool {
        if !self.entries.iter().any(|e| e.invoice_id == invoice_id) {
            return false;
        }
        if selected {
            self.selected.insert(invoice_id.to_string());
        } else {
            self.selected.remove(invoice_id);
        }
        true
    }

    pub fn select_visible(&mut self) {
        let ids: Vec<String> = self.visible().iter().map(|e| e.invoice_id.clone()).collect();
        self.selected.extend(ids);
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Selected entries in table order.
    pub fn selected_entries(&self) -> Vec<&InvoiceIndexEntry> {
        self.visible()
            .into_iter()
            .filter(|e| self.selected.contains(&e.invoice_id))
            .collect()
    }

    pub fn entry(&self, invoice: &str) -> Option<&InvoiceIndexEntry> {
        self.entries
            .iter()
            .find(|e| e.invoice_id == invoice || e.invoice_no() == invoice)
    }

    /// Run `/runs/prepare` for every selected invoice in order. A failure is
    /// recorded on its row and the batch carries on.
    pub async fn process_selected(
        &self,
        client: &InvoicesClient,
        shop: &str,
        use_invoice_qty: bool,
    ) -> Vec<ProcessOutcome> {
        let mut outcomes = Vec::new();
        for entry in self.selected_entries() {
            let invoice_no = entry.invoice_no().to_string();
            let Some(relpath) = data_relpath(&self.supplier, entry) else {
                warn!(invoice = %invoice_no, "invoice has no CSV path");
                outcomes.push(ProcessOutcome {
                    invoice_no,
                    ok: false,
                    stats: None,
                    error: Some("Invoice has no CSV path".to_string()),
                });
                continue;
            };
            match client
                .prepare_run(&self.supplier, shop, &relpath, use_invoice_qty)
                .await
            {
                Ok(result) => {
                    info!(invoice = %invoice_no, stats = ?result.stats, "invoice prepared");
                    outcomes.push(ProcessOutcome {
                        invoice_no,
                        ok: result.ok,
                        stats: Some(result.stats),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(invoice = %invoice_no, error = %e, "invoice prepare failed");
                    outcomes.push(ProcessOutcome {
                        invoice_no,
                        ok: false,
                        stats: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        outcomes
    }

    pub async fn preview(
        &self,
        client: &InvoicesClient,
        entry: &InvoiceIndexEntry,
        max_rows: u32,
    ) -> Result<CsvPreview, ApiError> {
        let relpath = data_relpath(&self.supplier, entry)
            .ok_or_else(|| ApiError::InvalidPath(format!("{} has no CSV path", entry.invoice_no())))?;
        client.preview_csv(&relpath, max_rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiGateway;
    use crate::diagnostics::RequestLog;
    use crate::settings::Settings;
    use serde_json::{json, Value};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    fn entry(number: &str, status: InvoiceStatus) -> InvoiceIndexEntry {
        InvoiceIndexEntry {
            supplier: "paul-lange".into(),
            invoice_id: format!("paul-lange:{number}"),
            number: number.into(),
            status,
            csv_path: Some(format!("invoices/csv/{number}.csv")),
            ..Default::default()
        }
    }

    fn table() -> InvoiceTable {
        InvoiceTable::new(
            "paul-lange",
            vec![
                entry("F2", InvoiceStatus::New),
                entry("F10", InvoiceStatus::Processed),
                entry("F2026010234", InvoiceStatus::InProgress),
                entry("F3", InvoiceStatus::New),
            ],
        )
    }

    fn numbers(rows: &[&InvoiceIndexEntry]) -> Vec<String> {
        rows.iter().map(|e| e.number.clone()).collect()
    }

    #[test]
    fn sorts_numbers_naturally() {
        let mut t = table();
        t.set_sort(SortOrder::Ascending);
        assert_eq!(numbers(&t.visible()), ["F2", "F3", "F10", "F2026010234"]);
        t.set_sort(SortOrder::Descending);
        assert_eq!(numbers(&t.visible())[0], "F2026010234");
    }

    #[test]
    fn filters_by_text_and_status() {
        let mut t = table();
        t.set_text_filter(" f1 ");
        assert_eq!(numbers(&t.visible()), ["F10"]);
        t.set_text_filter("");
        t.set_status_filter(Some(InvoiceStatus::New));
        t.set_sort(SortOrder::Ascending);
        assert_eq!(numbers(&t.visible()), ["F2", "F3"]);
    }

    #[test]
    fn paginates_and_clamps() {
        let mut t = table();
        t.set_page_size(3);
        assert_eq!(t.page_count(), 2);
        t.set_page(9);
        let page = t.current_page();
        assert_eq!(page.page, 1);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.total, 4);
    }

    #[test]
    fn selection_survives_reindex_only_for_known_ids() {
        let mut t = table();
        assert!(t.select("paul-lange:F2", true));
        assert!(t.select("paul-lange:F3", true));
        assert!(!t.select("paul-lange:NOPE", true));
        t.set_sort(SortOrder::Ascending);
        assert_eq!(numbers(&t.selected_entries()), ["F2", "F3"]);

        t.replace_entries(vec![entry("F3", InvoiceStatus::New)]);
        assert_eq!(numbers(&t.selected_entries()), ["F3"]);
    }

    #[test]
    fn receiving_action_follows_status() {
        assert_eq!(receiving_action(&entry("F2", InvoiceStatus::New)), ReceivingAction::Start);
        assert_eq!(
            receiving_action(&entry("F10", InvoiceStatus::Processed)),
            ReceivingAction::Reopen
        );
        let mut in_progress = entry("F2026010234", InvoiceStatus::InProgress);
        assert_eq!(receiving_action(&in_progress), ReceivingAction::Start);
        in_progress.current_session_id = Some("20260112093000".into());
        assert_eq!(
            receiving_action(&in_progress),
            ReceivingAction::Resume("20260112093000".into())
        );
    }

    #[test]
    fn relpath_is_rooted_at_data_dir() {
        let e = entry("F2", InvoiceStatus::New);
        assert_eq!(
            data_relpath("paul-lange", &e).as_deref(),
            Some("suppliers/paul-lange/invoices/csv/F2.csv")
        );
        let mut rooted = e.clone();
        rooted.rel_path = Some("suppliers/paul-lange/invoices/csv/2025/10/F2.csv".into());
        assert_eq!(
            data_relpath("other", &rooted).as_deref(),
            Some("suppliers/paul-lange/invoices/csv/2025/10/F2.csv")
        );
        let mut bare = e;
        bare.csv_path = None;
        assert_eq!(data_relpath("paul-lange", &bare), None);
    }

    fn read_request_body(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).expect("read request");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    return buf[end + 4..end + 4 + len].to_vec();
                }
            }
            if n == 0 {
                return Vec::new();
            }
        }
    }

    /// Serve `count` `/runs/prepare` calls on an ephemeral port. Relpaths
    /// naming `F10` get a 500, everything else a small stats body. The
    /// thread returns the relpaths in arrival order.
    fn prepare_server(count: usize) -> (String, std::thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral TCP port for test");
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for _ in 0..count {
                let (mut stream, _) = listener.accept().expect("accept HTTP connection");
                let request: Value =
                    serde_json::from_slice(&read_request_body(&mut stream)).unwrap_or(Value::Null);
                let relpath = request["invoice_relpath"].as_str().unwrap_or_default().to_string();
                let (status, reply) = if relpath.contains("F10") {
                    ("500 Internal Server Error", json!({ "detail": "pipeline failed" }))
                } else {
                    (
                        "200 OK",
                        json!({ "ok": true, "stats": { "existing": 3, "new": 1, "unmatched": 0, "invoice_items": 4 } }),
                    )
                };
                let reply = reply.to_string();
                write!(
                    stream,
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                    reply.len()
                )
                .expect("write response");
                seen.push(relpath);
            }
            seen
        });
        (base, handle)
    }

    #[tokio::test]
    async fn process_selected_records_failures_and_continues() {
        let mut no_csv = entry("F2", InvoiceStatus::New);
        no_csv.csv_path = None;
        let mut t = InvoiceTable::new(
            "paul-lange",
            vec![
                entry("F20", InvoiceStatus::New),
                entry("F10", InvoiceStatus::New),
                no_csv,
                entry("F1", InvoiceStatus::New),
            ],
        );
        t.set_sort(SortOrder::Ascending);
        t.select_visible();

        let (base, server) = prepare_server(3);
        let mut settings = Settings::default();
        settings.api.base_url = base;
        let client = InvoicesClient::new(ApiGateway::new(&settings, RequestLog::new(8)).unwrap());

        let outcomes = t.process_selected(&client, "shop-main", true).await;
        let order: Vec<&str> = outcomes.iter().map(|o| o.invoice_no.as_str()).collect();
        assert_eq!(order, ["F1", "F2", "F10", "F20"]);

        assert!(outcomes[0].ok);
        assert_eq!(outcomes[0].stats.as_ref().map(|s| s.existing), Some(3));
        assert!(!outcomes[1].ok);
        assert_eq!(outcomes[1].error.as_deref(), Some("Invoice has no CSV path"));
        assert!(!outcomes[2].ok);
        assert!(outcomes[2].stats.is_none());
        assert!(outcomes[2].error.as_deref().unwrap().starts_with("500"));
        assert!(outcomes[3].ok);
        assert_eq!(outcomes[3].stats.as_ref().map(|s| s.invoice_items), Some(4));

        let seen = server.join().expect("server thread panicked");
        assert_eq!(
            seen,
            [
                "suppliers/paul-lange/invoices/csv/F1.csv",
                "suppliers/paul-lange/invoices/csv/F10.csv",
                "suppliers/paul-lange/invoices/csv/F20.csv",
            ]
        );
    }
}
