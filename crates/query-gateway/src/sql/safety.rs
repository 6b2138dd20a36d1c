//! Safe-SELECT validation.
//!
//! Shape allowlist (must start with `SELECT`) plus a keyword denylist. This is
//! not a parser. The text is split into runs of ASCII letters and every run is
//! compared against the denylist, so a keyword is caught anywhere it stands as
//! a word: inside string literals, comments, bracketed or underscored
//! identifiers (`update_log`, `[drop]`). Letters-only runs such as `CreatedUtc`
//! or `Deleted` are distinct words and pass.
//!
//! A plain substring rule would refuse any query naming a `CreatedUtc` column,
//! so word matching is the deliberate rule here. The flip side: a keyword fused
//! with other letters is not caught, so `sp_executesql` passes (its runs are
//! `SP` and `EXECUTESQL`). The read-only connection is the backstop for that.

/// Keywords that denote data modification, schema modification, execution or
/// permission changes.
pub const DENYLIST: [&str; 15] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "MERGE", "EXEC",
    "EXECUTE", "GRANT", "REVOKE", "DENY", "BACKUP", "RESTORE",
];

pub fn is_safe(sql: &str) -> bool {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return false;
    }
    let normalized = trimmed.to_uppercase();
    if !normalized.starts_with("SELECT") {
        return false;
    }
    first_violation(&normalized).is_none()
}

/// First denylisted keyword found in `sql`, for logging refusals.
pub fn first_violation(sql: &str) -> Option<&'static str> {
    let normalized = sql.to_uppercase();
    normalized
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .find_map(|word| DENYLIST.iter().copied().find(|keyword| *keyword == word))
}
