use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::episode::{EpisodeIdentity, EpisodeMetadata, parse_season_episode};
use crate::error::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "http://services.tvrage.com/tools/quickinfo.php";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const SHOW_NAME_KEY: &str = "Show Name";
const EPISODE_INFO_KEY: &str = "Episode Info";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Client for the line oriented `Key@Value` episode information service.
#[derive(Debug, Clone)]
pub struct LookupClient {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl LookupClient {
    pub fn new(config: &LookupConfig) -> Result<Self> {
        let endpoint = reqwest::Url::parse(&config.endpoint).map_err(Error::lookup)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(Error::lookup)?;
        Ok(Self { client, endpoint })
    }

    /// The query URL for `identity`: the show name percent-encoded and the
    /// episode as `SxE`.
    pub fn query_url(&self, identity: &EpisodeIdentity) -> reqwest::Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("show", &identity.show_name)
            .append_pair("ep", &format!("{}x{}", identity.season, identity.episode));
        url
    }

    pub async fn lookup(&self, identity: &EpisodeIdentity) -> Result<EpisodeMetadata> {
        let url = self.query_url(identity);
        debug!(%url, "looking up episode");
        let body = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(Error::lookup)?
            .text()
            .await
            .map_err(Error::lookup)?;
        parse_response(BufReader::new(body.as_bytes()), identity).await
    }
}

/// Parse a lookup response.
///
/// Lines are `Key@Value`; lines without an `@` and unknown keys are skipped.
/// `Show Name` replaces the show name, `Episode Info` is
/// `SxE^Title^AirDate` and replaces season and episode. A response without an
/// `Episode Info` line is incomplete.
pub async fn parse_response<R>(reader: R, identity: &EpisodeIdentity) -> Result<EpisodeMetadata>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut show_name = None;
    let mut episode = None;

    while let Some(line) = lines.next_line().await.map_err(Error::lookup)? {
        let Some((key, value)) = line.split_once('@') else {
            continue;
        };
        match key {
            SHOW_NAME_KEY => show_name = Some(value.trim().to_string()),
            EPISODE_INFO_KEY => episode = Some(parse_episode_info(value)?),
            _ => {}
        }
    }

    let (season, episode, episode_title) = episode.ok_or(Error::ParseFailure {
        subject: "episode lookup response",
    })?;
    let show_name = show_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| identity.show_name.clone());

    Ok(EpisodeMetadata {
        identity: EpisodeIdentity {
            show_name,
            season,
            episode,
        },
        episode_title,
    })
}

fn parse_episode_info(value: &str) -> Result<(u32, u32, String)> {
    let malformed = || Error::ParseFailure {
        subject: "episode lookup response",
    };
    let mut parts = value.splitn(3, '^');
    let numbers = parts.next().ok_or_else(malformed)?;
    let title = parts.next().ok_or_else(malformed)?;
    let (season, episode) = numbers.split_once('x').ok_or_else(malformed)?;
    let (season, episode) = parse_season_episode(season, episode).ok_or_else(malformed)?;
    Ok((season, episode, title.to_string()))
}
