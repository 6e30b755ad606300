use core::fmt;
use regex::Regex;
use std::sync::LazyLock;

static EPISODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(.+)( |\.)[sS]?([0-9]+)[xeXE]([0-9]+)").expect("episode pattern is valid")
});

/// Show, season and episode number extracted from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeIdentity {
    pub show_name: String,
    pub season: u32,
    pub episode: u32,
}

impl fmt::Display for EpisodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{:02}", self.show_name, self.season, self.episode)
    }
}

/// An identity confirmed by the metadata service, plus the episode title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMetadata {
    pub identity: EpisodeIdentity,
    pub episode_title: String,
}

/// Parse season and episode numbers. `None` when either is not a number or
/// when both are zero, which is indistinguishable from a failed parse.
pub fn parse_season_episode(season: &str, episode: &str) -> Option<(u32, u32)> {
    let season = season.parse::<u32>().ok()?;
    let episode = episode.parse::<u32>().ok()?;
    if season == 0 && episode == 0 {
        return None;
    }
    Some((season, episode))
}

/// Extract an [`EpisodeIdentity`] from a bare file name such as
/// `Show.Name.S03E06.720p.mkv` or `Some Show 2x10.avi`.
///
/// The title is greedy, so the last season/episode marker in the name wins.
/// When the title is separated by `.`, its dots become spaces.
pub fn parse_episode_name(file_name: &str) -> Option<EpisodeIdentity> {
    let captures = EPISODE_PATTERN.captures(file_name)?;
    let (season, episode) = parse_season_episode(&captures[3], &captures[4])?;

    let title = &captures[1];
    let show_name = if &captures[2] == "." {
        title.replace('.', " ")
    } else {
        title.to_string()
    };

    Some(EpisodeIdentity {
        show_name,
        season,
        episode,
    })
}

/// The extension of the last path component including its dot, or an empty
/// string when there is none.
pub fn extension(file_name: &str) -> &str {
    file_name.rfind('.').map_or("", |index| &file_name[index..])
}
