//! Markdown rendering of query results.

use crate::sql::executor::TabularResult;

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Rows shown before the rest are summarized as omitted.
    pub max_display_rows: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { max_display_rows: 50 }
    }
}

pub fn render(sql: &str, result: &TabularResult, options: RenderOptions) -> String {
    let mut out = String::new();
    out.push_str("**SQL**\n```sql\n");
    out.push_str(sql);
    out.push_str("\n```\n");

    if result.rows.is_empty() {
        out.push_str("_No rows returned._\n");
        return out;
    }

    out.push_str("| ");
    for column in &result.columns {
        out.push_str(&escape_cell(column));
        out.push_str(" | ");
    }
    out.push('\n');
    out.push_str("| ");
    for _ in &result.columns {
        out.push_str("--- | ");
    }
    out.push('\n');

    let shown = result.rows.len().min(options.max_display_rows);
    for row in result.rows.iter().take(shown) {
        out.push_str("| ");
        for value in row {
            // NULL renders as an empty cell
            out.push_str(&escape_cell(value.as_deref().unwrap_or("")));
            out.push_str(" | ");
        }
        out.push('\n');
    }

    let omitted = result.rows.len() - shown;
    if omitted > 0 {
        out.push_str(&format!("_… {} more rows omitted._\n", omitted));
    }
    out
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace(|c: char| c == '\r' || c == '\n', " ")
}
