//! One function per subcommand. Output goes to stdout, diagnostics to the log.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use domain::record::NewRecord;
use domain::search::SearchQuery;
use domain::{record, search as records_search, tag, Id};
use log::*;
use session_auth::secrecy::ExposeSecret;
use session_auth::{decode_claims, is_token_expired, Session, WindowMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Prints the login URL and feeds each stdin line, a JSON
/// `{"origin": ..., "data": {...}}` message, to the credential channel until
/// one of them establishes a session.
pub async fn login(session: &Session) -> Result<()> {
    let url = session
        .login_url()
        .await
        .context("Could not fetch the login URL")?;
    println!("Open this URL to log in:\n\n  {url}\n");
    println!(
        "Then paste the credential message posted by {} (one JSON object per line):",
        session.trusted_origin()
    );

    let mut tokens = session.watch_tokens();
    tokens.borrow_and_update();

    let (tx, rx) = mpsc::channel(8);
    let listener = session.listen(rx);
    let reader = tokio::spawn(read_messages(tx));

    let established = async {
        while tokens.changed().await.is_ok() {
            if tokens.borrow_and_update().is_some() {
                return true;
            }
        }
        false
    };

    let logged_in = tokio::select! {
        logged_in = established => logged_in,
        _ = listener => session.is_authenticated(),
    };
    reader.abort();

    if !logged_in {
        bail!("Input ended before a session was established");
    }
    println!("Logged in.");
    Ok(())
}

async fn read_messages(tx: mpsc::Sender<WindowMessage>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Skipping input that is not a credential message: {e}"),
        }
    }
    Ok(())
}

pub async fn logout(session: &Session) -> Result<()> {
    session.logout().await;
    println!("Logged out.");
    Ok(())
}

pub fn status(session: &Session) -> Result<()> {
    if !session.is_authenticated() {
        println!("Not logged in.");
        return Ok(());
    }

    let access_token = session.watch_tokens().borrow().clone();
    let Some(access_token) = access_token else {
        println!("Not logged in.");
        return Ok(());
    };
    let token = access_token.expose_secret();
    match decode_claims(token).and_then(|claims| claims.expires_at()) {
        Some(expires_at) if is_token_expired(token, Utc::now()) => {
            println!("Logged in. Access token expired at {expires_at}; it will be renewed on next use.")
        }
        Some(expires_at) => println!("Logged in. Access token expires at {expires_at}."),
        None => println!("Logged in. Access token expiry unknown."),
    }
    Ok(())
}

pub async fn refresh(session: &Session) -> Result<()> {
    let access_token = session
        .refresh_access_token()
        .await
        .context("Could not renew the session; log in again")?;
    match decode_claims(access_token.expose_secret()).and_then(|claims| claims.expires_at()) {
        Some(expires_at) => println!("Access token renewed, expires at {expires_at}."),
        None => println!("Access token renewed."),
    }
    Ok(())
}

pub async fn tags(session: &Session) -> Result<()> {
    for name in tag::names(session).await.map_err(explain)? {
        println!("{name}");
    }
    Ok(())
}

pub async fn search(
    session: &Session,
    query: String,
    tags: Vec<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let query = SearchQuery::new(query).with_tags(tags).between(from, to);
    let hits = records_search::search(session, &query)
        .await
        .map_err(explain)?;
    if hits.is_empty() {
        println!("No matching records.");
    }
    for hit in hits {
        println!("{:.3}  {}  {}", hit.distance, hit.id, hit.name);
        if !hit.tags.is_empty() {
            println!("       tags: {}", hit.tags.join(", "));
        }
    }
    Ok(())
}

pub async fn show(session: &Session, id: Id) -> Result<()> {
    let record = record::get(session, id).await.map_err(explain)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub async fn add(
    session: &Session,
    name: String,
    notes: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let record = record::create(session, &NewRecord { name, notes, tags })
        .await
        .map_err(explain)?;
    println!("Created {}.", record.id);
    Ok(())
}

pub async fn edit(
    session: &Session,
    id: Id,
    name: String,
    notes: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let record = record::update(session, id, &NewRecord { name, notes, tags })
        .await
        .map_err(explain)?;
    println!("Updated {}.", record.id);
    Ok(())
}

pub async fn delete(session: &Session, id: Id) -> Result<()> {
    record::delete(session, id).await.map_err(explain)?;
    println!("Deleted {id}.");
    Ok(())
}

fn explain(err: domain::error::Error) -> anyhow::Error {
    if err.is_unauthenticated() {
        anyhow::Error::new(err).context("Not logged in; run `records_client login`")
    } else {
        anyhow::Error::new(err)
    }
}
