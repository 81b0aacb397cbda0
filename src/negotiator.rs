// src/negotiator.rs

use crate::catalog::{CatalogError, Quality, StreamManifest, StreamSource, Track};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_EXTENSION: &str = ".m4a";
const DEFAULT_BIT_DEPTH: u32 = 16;
const DEFAULT_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Session expired or invalid rights.")]
    AuthExpired(#[source] CatalogError),
    #[error("could not get a stream in any quality: {last}")]
    AllQualitiesFailed { last: String },
    #[error("no download URLs available")]
    NoStreamUrls,
}

/// Where the bytes of a stream live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamUrls {
    Single(String),
    /// Ordered segments to be concatenated.
    Segmented(Vec<String>),
}

impl StreamUrls {
    fn from_list(mut urls: Vec<String>) -> Option<Self> {
        match urls.len() {
            0 => None,
            1 => urls.pop().map(StreamUrls::Single),
            _ => Some(StreamUrls::Segmented(urls)),
        }
    }

    pub fn as_slice(&self) -> &[String] {
        match self {
            StreamUrls::Single(url) => std::slice::from_ref(url),
            StreamUrls::Segmented(urls) => urls,
        }
    }
}

/// A playable stream for one track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub codec: String,
    /// Container extension with leading dot.
    pub extension: String,
    /// The ladder tier that produced this stream.
    pub tier: Quality,
    /// What the catalog says it served; falls back to the tier name.
    pub quality_label: String,
    pub bit_depth: u32,
    pub sample_rate: u32,
    pub urls: StreamUrls,
}

impl StreamDescriptor {
    fn from_manifest(manifest: StreamManifest, tier: Quality) -> Result<Self, StreamError> {
        let urls = StreamUrls::from_list(manifest.urls).ok_or(StreamError::NoStreamUrls)?;
        let extension = match manifest.file_extension {
            Some(ext) if ext.starts_with('.') => ext,
            Some(ext) if !ext.is_empty() => format!(".{ext}"),
            _ => DEFAULT_EXTENSION.to_string(),
        };
        Ok(Self {
            codec: manifest.codec.unwrap_or_else(|| "unknown".to_string()),
            extension,
            tier,
            quality_label: manifest
                .audio_quality
                .unwrap_or_else(|| tier.as_str().to_string()),
            bit_depth: manifest.bit_depth.unwrap_or(DEFAULT_BIT_DEPTH),
            sample_rate: manifest.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            urls,
        })
    }
}

/// Asks the catalog for a stream, walking down the quality ladder on failure.
pub struct StreamNegotiator {
    source: Arc<dyn StreamSource>,
    // Guards the session-wide quality setting together with the request that reads it.
    session_lock: Mutex<()>,
}

impl StreamNegotiator {
    pub fn new(source: Arc<dyn StreamSource>) -> Self {
        Self {
            source,
            session_lock: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &Arc<dyn StreamSource> {
        &self.source
    }

    pub async fn resolve(
        &self,
        track: &Track,
        preferred: Quality,
    ) -> Result<StreamDescriptor, StreamError> {
        let mut last_error = None;

        for &quality in preferred.ladder_from() {
            debug!(track_id = %track.id, %quality, "requesting stream");
            let attempt = {
                let _session = self.session_lock.lock().await;
                self.source.set_quality(quality);
                self.source.get_stream(track).await
            };

            match attempt {
                Ok(manifest) => {
                    info!(track_id = %track.id, %quality, "got stream");
                    return StreamDescriptor::from_manifest(manifest, quality);
                }
                Err(e) => {
                    warn!(track_id = %track.id, %quality, error = %e, "stream request failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) if e.is_auth() => StreamError::AuthExpired(e),
            Some(e) => StreamError::AllQualitiesFailed { last: e.to_string() },
            None => StreamError::AllQualitiesFailed {
                last: "no quality tiers to try".to_string(),
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::Video;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;

    /// Fails every tier in `failing`, records each tier it was asked for.
    pub(crate) struct LadderSource {
        pub current: SyncMutex<Quality>,
        pub failing: Vec<Quality>,
        pub status: u16,
        pub asked: SyncMutex<Vec<Quality>>,
        pub urls: Vec<String>,
    }

    impl LadderSource {
        pub fn failing(failing: Vec<Quality>) -> Self {
            Self {
                current: SyncMutex::new(Quality::HighLossless),
                failing,
                status: 500,
                asked: SyncMutex::new(Vec::new()),
                urls: vec!["https://cdn.example/track.flac".to_string()],
            }
        }
    }

    #[async_trait]
    impl StreamSource for LadderSource {
        fn quality(&self) -> Quality {
            *self.current.lock()
        }

        fn set_quality(&self, quality: Quality) {
            *self.current.lock() = quality;
        }

        async fn get_stream(&self, _track: &Track) -> Result<StreamManifest, CatalogError> {
            let quality = self.quality();
            self.asked.lock().push(quality);
            if self.failing.contains(&quality) {
                return Err(CatalogError::Http {
                    status: self.status,
                    message: format!("{quality} unavailable"),
                });
            }
            Ok(StreamManifest {
                codec: Some("AAC".into()),
                file_extension: Some(".m4a".into()),
                audio_quality: Some(quality.as_str().into()),
                bit_depth: None,
                sample_rate: None,
                urls: self.urls.clone(),
            })
        }

        async fn get_video_url(&self, _video: &Video) -> Result<String, CatalogError> {
            Err(CatalogError::Other("videos unsupported".into()))
        }
    }

    fn track() -> Track {
        Track {
            id: "1".into(),
            name: "Song".into(),
            artist: None,
            album: None,
            track_num: None,
        }
    }

    #[tokio::test]
    async fn falls_back_to_first_working_tier() {
        let source = Arc::new(LadderSource::failing(vec![
            Quality::HiResLossless,
            Quality::HighLossless,
        ]));
        let negotiator = StreamNegotiator::new(source.clone());

        let stream = negotiator
            .resolve(&track(), Quality::HiResLossless)
            .await
            .unwrap();

        assert_eq!(stream.tier, Quality::Low320k);
        assert_eq!(
            *source.asked.lock(),
            vec![Quality::HiResLossless, Quality::HighLossless, Quality::Low320k]
        );
        assert_eq!(stream.bit_depth, 16);
        assert_eq!(stream.sample_rate, 44_100);
        assert_eq!(
            stream.urls,
            StreamUrls::Single("https://cdn.example/track.flac".into())
        );
    }

    #[tokio::test]
    async fn starts_at_preferred_tier() {
        let source = Arc::new(LadderSource::failing(vec![]));
        let negotiator = StreamNegotiator::new(source.clone());

        negotiator.resolve(&track(), Quality::Low320k).await.unwrap();

        assert_eq!(*source.asked.lock(), vec![Quality::Low320k]);
    }

    #[tokio::test]
    async fn exhausted_ladder_reports_auth_or_generic_failure() {
        let negotiator = StreamNegotiator::new(Arc::new(LadderSource::failing(
            Quality::LADDER.to_vec(),
        )));
        let err = negotiator
            .resolve(&track(), Quality::HiResLossless)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::AllQualitiesFailed { .. }));

        let mut source = LadderSource::failing(Quality::LADDER.to_vec());
        source.status = 401;
        let negotiator = StreamNegotiator::new(Arc::new(source));
        let err = negotiator
            .resolve(&track(), Quality::HighLossless)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::AuthExpired(_)));
        assert_eq!(err.to_string(), "Session expired or invalid rights.");
    }

    #[tokio::test]
    async fn empty_manifest_is_no_stream_urls() {
        let mut source = LadderSource::failing(vec![]);
        source.urls.clear();
        let negotiator = StreamNegotiator::new(Arc::new(source));

        let err = negotiator
            .resolve(&track(), Quality::HighLossless)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::NoStreamUrls));
    }

    #[test]
    fn many_urls_are_segmented() {
        let manifest = StreamManifest {
            urls: vec!["a".into(), "b".into()],
            file_extension: Some("flac".into()),
            ..StreamManifest::default()
        };
        let stream = StreamDescriptor::from_manifest(manifest, Quality::HighLossless).unwrap();
        assert_eq!(stream.extension, ".flac");
        assert_eq!(stream.quality_label, "LOSSLESS");
        assert_eq!(stream.urls.as_slice().len(), 2);
    }
}
