use std::{path::Path, sync::LazyLock};

use anyhow::{Context, Result};
use indoc::formatdoc;
use regex::Regex;
use tracing::instrument;

pub const GROUP_TITLE: &str = "Dengetv54";
pub const PLAYER_USER_AGENT: &str = "Mozilla/5.0";

/// Stream files published under every live base URL, in playlist order
pub const CHANNEL_FILES: &[&str] = &[
    "yayinzirve.m3u8",
    "yayin1.m3u8",
    "yayininat.m3u8",
    "yayinb2.m3u8",
    "yayinb3.m3u8",
    "yayinb4.m3u8",
    "yayinb5.m3u8",
    "yayinbm1.m3u8",
    "yayinbm2.m3u8",
    "yayinss.m3u8",
    "yayinss2.m3u8",
    "yayint1.m3u8",
    "yayint2.m3u8",
    "yayint3.m3u8",
    "yayinsmarts.m3u8",
    "yayinsms2.m3u8",
    "yayintrtspor.m3u8",
    "yayintrtspor2.m3u8",
    "yayintrt1.m3u8",
    "yayinas.m3u8",
    "yayinatv.m3u8",
    "yayintv8.m3u8",
    "yayintv85.m3u8",
    "yayinf1.m3u8",
    "yayinnbatv.m3u8",
    "yayineu1.m3u8",
    "yayineu2.m3u8",
    "yayinex1.m3u8",
    "yayinex2.m3u8",
    "yayinex3.m3u8",
    "yayinex4.m3u8",
    "yayinex5.m3u8",
    "yayinex6.m3u8",
    "yayinex7.m3u8",
    "yayinex8.m3u8",
];

static DIGIT_RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("static regex is valid"));

/// `yayinb2.m3u8` -> `Yayinb 2`
fn channel_name(file: &str) -> String {
    let stem = file.strip_suffix(".m3u8").unwrap_or(file);
    let spaced = DIGIT_RUN_REGEX.replace_all(stem, " ${1}");

    let mut name = String::with_capacity(spaced.len());
    let mut prev_alpha = false;
    for c in spaced.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                name.extend(c.to_lowercase());
            } else {
                name.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            name.push(c);
            prev_alpha = false;
        }
    }
    name
}

/// Renders the M3U document pointing every channel at `base_url`
#[must_use]
pub fn render(base_url: &str, referrer: &str) -> String {
    let mut out = String::from("#EXTM3U\n");
    for file in CHANNEL_FILES {
        out.push_str(&formatdoc!(
            r#"
            #EXTINF:-1 group-title="{group}",{name}
            #EXTVLCOPT:http-user-agent={ua}
            #EXTVLCOPT:http-referrer={referrer}
            {base_url}{file}
            "#,
            group = GROUP_TITLE,
            name = channel_name(file),
            ua = PLAYER_USER_AGENT,
        ));
    }
    out
}

/// Writes the rendered playlist to `path`, creating parent directories as needed
///
/// # Errors
/// Errors when the directory or file cannot be written
#[instrument]
pub async fn write(path: &Path, base_url: &str, referrer: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Creating output directory {parent:?}"))?;
    }

    tokio::fs::write(path, render(base_url, referrer))
        .await
        .with_context(|| format!("Writing playlist {path:?}"))
}
