//! Utility functions
//!
use std::{fs::File, io::Cursor, path::Path};

use reqwest::Client;

use crate::Error;

/// Download a file from a URL to a given filepath.
///
/// The content is written to a temporary sibling first so that an interrupted download never
/// leaves a truncated file at `filepath`.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
) -> Result<(), Error> {
    let filepath = filepath.as_ref();
    let resp = client.get(url).send().await?.error_for_status()?;

    let partial = filepath.with_extension("part");
    {
        let mut file = File::create(&partial)?;
        let mut content = Cursor::new(resp.bytes().await?);
        std::io::copy(&mut content, &mut file)?;
    }
    std::fs::rename(&partial, filepath)?;

    Ok(())
}
