//! Identify a TV episode by its file name and rename it from looked-up metadata.

use tokio::fs;
use tracing::info;

use crate::episode::{EpisodeMetadata, extension, parse_episode_name};
use crate::error::{Error, Result};
use crate::fsops::move_path;
use crate::jail::{Jail, ResolvedPath};
use crate::lookup::LookupClient;

/// A rename that has been computed but not yet performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePlan {
    pub source: ResolvedPath,
    pub target: ResolvedPath,
    pub metadata: EpisodeMetadata,
}

pub struct EpisodeRenamer<'a> {
    jail: &'a Jail,
    lookup: &'a LookupClient,
}

impl<'a> EpisodeRenamer<'a> {
    pub fn new(jail: &'a Jail, lookup: &'a LookupClient) -> Self {
        Self { jail, lookup }
    }

    /// Resolve `raw`, parse its file name, look the episode up and compute
    /// the new path next to the original. Nothing is renamed.
    pub async fn plan(&self, raw: &str) -> Result<RenamePlan> {
        if raw.is_empty() {
            return Err(Error::InvalidPath {
                reason: "no path given",
            });
        }
        let source = self.jail.resolve_async(raw).await?;
        fs::metadata(source.as_path())
            .await
            .map_err(|err| Error::io("stat", source.as_path(), err))?;

        let file_name = source.file_name().ok_or(Error::InvalidPath {
            reason: "path has no file name",
        })?;
        let identity = parse_episode_name(file_name).ok_or(Error::ParseFailure {
            subject: "file name",
        })?;
        let metadata = self.lookup.lookup(&identity).await?;

        let new_name = compose_file_name(&metadata, extension(file_name));
        let target = self.jail.resolve_sibling_async(&source, &new_name).await?;
        Ok(RenamePlan {
            source,
            target,
            metadata,
        })
    }

    /// Rename the episode at `raw` and return its new jail-relative path.
    pub async fn rename_episode(&self, raw: &str) -> Result<String> {
        let plan = self.plan(raw).await?;
        move_path(&plan.source, &plan.target).await?;
        let new_path = self.jail.display(&plan.target);
        info!(episode = %plan.metadata.identity, new_path = %new_path, "renamed episode");
        Ok(new_path)
    }
}

/// `<Show> - <S>x<EE> - <Title><ext>`, with every `/` in the show name and
/// title replaced by `_`.
pub fn compose_file_name(metadata: &EpisodeMetadata, extension: &str) -> String {
    let name = format!(
        "{} - {}x{:02} - {}",
        metadata.identity.show_name,
        metadata.identity.season,
        metadata.identity.episode,
        metadata.episode_title
    );
    format!("{}{}", name.replace('/', "_"), extension)
}
