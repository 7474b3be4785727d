use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// === API Request Models ===

/// Which catalog the client asked for.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Audio,
    Video,
    /// Unknown values fall back to the merged catalog.
    #[default]
    #[serde(other)]
    Both,
}

/// The query parameters for a `GET /api/formats` request.
#[derive(Deserialize, Debug)]
pub struct FormatsQuery {
    pub url: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: CatalogKind,
}

/// The query parameters for a `GET /api/download` request.
#[derive(Deserialize, Debug)]
pub struct DownloadQuery {
    pub url: Option<String>,
    pub format: Option<String>,
    #[serde(rename = "downloadId")]
    pub download_id: Option<String>,
}

/// The query parameters for a `GET /api/download/progress` request.
#[derive(Deserialize, Debug)]
pub struct ProgressQuery {
    #[serde(rename = "downloadId")]
    pub download_id: Option<String>,
}

// === Extractor Output Models ===

/// Represents the top-level JSON output from `yt-dlp -j`.
#[derive(Deserialize, Debug, Default)]
pub struct VideoInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "usable_records")]
    pub formats: Vec<Format>,
}

/// One variant record as reported by the extractor. Sites differ wildly in
/// what they fill in, so every field tolerates `null` and loose number types.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Format {
    #[serde(default, deserialize_with = "lenient_string")]
    pub format_id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ext: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub vcodec: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub acodec: Option<String>,
    #[serde(default, deserialize_with = "lenient_height")]
    pub height: Option<u32>,
    #[serde(default, deserialize_with = "lenient_float")]
    pub fps: Option<f64>,
    /// Audio bitrate in KBit/s.
    #[serde(default, deserialize_with = "lenient_float")]
    pub abr: Option<f64>,
    #[serde(default, deserialize_with = "lenient_size")]
    pub filesize: Option<u64>,
    #[serde(default, deserialize_with = "lenient_size")]
    pub filesize_approx: Option<u64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub format_note: Option<String>,
}

// --- Lenient field decoding ---

/// Keeps every record that still decodes; a single odd entry must not cost
/// the whole list.
fn usable_records<'de, D>(deserializer: D) -> Result<Vec<Format>, D::Error>
where
    D: Deserializer<'de>,
{
    let records = match Value::deserialize(deserializer)? {
        Value::Array(records) => records,
        _ => return Ok(Vec::new()),
    };
    Ok(records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<Format>(record) {
            Ok(format) => Some(format),
            Err(e) => {
                tracing::debug!("Skipping malformed format record: {}", e);
                None
            }
        })
        .collect())
}

/// Strings as-is, numbers in their textual form, anything else empty.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_default())
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    })
}

/// Byte counts; fractional estimates are truncated, negatives dropped.
fn lenient_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_float(deserializer)?.filter(|v| *v >= 0.0).map(|v| v as u64))
}

fn lenient_height<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_size(deserializer)?.and_then(|v| u32::try_from(v).ok()))
}

impl Format {
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    /// Exact size when known, otherwise the extractor's estimate.
    pub fn size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if !c.is_empty() && c != "none")
}
