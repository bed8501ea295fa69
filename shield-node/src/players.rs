//! Extraction of connected-player addresses from the game server.
//!
//! Two console commands are parsed independently: the interactive `status`
//! table and the SourceTV `tv_clients` list. Both parsers are pure text
//! functions; only the primary command is allowed to fail the whole query.

use crate::error::Result;
use crate::rcon::RconSession;
use tracing::debug;

/// Collect the IPv4 addresses of everyone currently connected.
///
/// Status-table addresses come first, then SourceTV clients, each in table
/// order. Addresses appearing in both tables are intentionally repeated.
/// A `tv_clients` failure is tolerated; a `status` failure is not.
pub async fn player_ips(session: &mut dyn RconSession) -> Result<Vec<String>> {
    let status = session.execute("status").await?;
    let mut ips = parse_status_ips(&status);

    match session.execute("tv_clients").await {
        Ok(tv) if !tv.is_empty() => ips.extend(parse_tv_client_ips(&tv)),
        Ok(_) => {}
        Err(e) => {
            debug!(error = %e, "tv_clients query failed; keeping status addresses only");
        }
    }

    Ok(ips)
}

/// Parse the `status` player table.
///
/// Player rows start with `#` and contain the token `active`; the last
/// whitespace-separated field is `address:port`. Bot rows have no trailing
/// address (their last field is `active` itself) and are skipped.
fn parse_status_ips(response: &str) -> Vec<String> {
    let mut ips = Vec::new();

    for line in response.lines() {
        if !line.starts_with('#') || !line.contains("active") {
            continue;
        }
        let Some(last_field) = line.split_whitespace().last() else {
            continue;
        };
        let address = last_field.split(':').next().unwrap_or(last_field);
        if address != "active" {
            ips.push(address.to_string());
        }
    }

    ips
}

/// Parse the `tv_clients` table.
///
/// Candidate rows start with the literal `ID` and carry at least three
/// commas; the fourth comma-delimited field, trimmed, is `address:port`.
/// The header's fourth field has no `:` and falls through.
fn parse_tv_client_ips(response: &str) -> Vec<String> {
    let mut ips = Vec::new();

    for line in response.lines() {
        if !line.starts_with("ID") {
            continue;
        }
        let segments: Vec<&str> = line.split(',').collect();
        if segments.len() <= 3 {
            continue;
        }
        let field = segments[3].trim();
        if let Some(idx) = field.find(':') {
            if idx > 0 {
                ips.push(field[..idx].to_string());
            }
        }
    }

    ips
}
