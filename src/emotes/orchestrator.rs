//! Turning user supplied images into guild emotes.
//!
//! One ingestion moves through fetching, validating, an optional
//! normalization step, and the upload. Any step can fail with a typed
//! [`EmoteError`]; [`Ingestor::render_error`] is the only place those become
//! text for Discord users.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::archive::{extract_stream, ArchiveEntry};
use crate::common::types::{natural_delta, natural_size};
use crate::common::{CreatedEmote, EmoteCounts, EmoteError, EmoteResult, GuildId, EMOTE_SIZE_LIMIT};
use crate::image::{classify, ImageBlob, ImageWorker, Operation};

use super::client::EmoteClient;
use super::fetch::{Fetcher, IMAGE_MIMETYPES};

/// Reactions used to acknowledge commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEmojis {
    pub success: String,
    pub failure: String,
}

impl Default for StatusEmojis {
    fn default() -> Self {
        Self {
            success: "✅".to_string(),
            failure: "❌".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub shrink_timeout: Duration,
    pub convert_timeout: Duration,
    /// Largest archive member that will be read.
    pub archive_size_limit: u64,
    /// Command prefix, for pointing users at other commands.
    pub command_prefix: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            shrink_timeout: Duration::from_secs(30),
            convert_timeout: Duration::from_secs(30),
            archive_size_limit: 50_000_000,
            command_prefix: "em/".to_string(),
        }
    }
}

/// Where the image for a new emote comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Downloaded. Trusted sources skip the HEAD check.
    Url { url: String, trusted: bool },
    /// Already in memory, e.g. an archive member.
    Bytes(Bytes),
}

impl ImageSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            trusted: false,
        }
    }
}

/// The guild an emote is added to, and how full it is.
#[derive(Debug, Clone, Copy)]
pub struct GuildSlots {
    pub guild: GuildId,
    pub counts: EmoteCounts,
    /// Maximum emotes per kind.
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub emote: CreatedEmote,
    /// A still image was turned into a GIF for lack of static slots.
    pub converted: bool,
}

impl AddOutcome {
    pub fn message(&self) -> String {
        let suffix = if self.converted { " as a GIF." } else { "." };
        format!("Emote {} successfully created{}", self.emote, suffix)
    }
}

pub struct Ingestor {
    fetcher: Fetcher,
    client: Arc<EmoteClient>,
    worker: Arc<dyn ImageWorker>,
    settings: IngestSettings,
    emojis: StatusEmojis,
}

impl Ingestor {
    pub fn new(
        fetcher: Fetcher,
        client: Arc<EmoteClient>,
        worker: Arc<dyn ImageWorker>,
        settings: IngestSettings,
        emojis: StatusEmojis,
    ) -> Self {
        Self {
            fetcher,
            client,
            worker,
            settings,
            emojis,
        }
    }

    pub fn client(&self) -> &EmoteClient {
        &self.client
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn emojis(&self) -> &StatusEmojis {
        &self.emojis
    }

    /// Fetch, normalize and upload one emote.
    pub async fn add_emote(
        &self,
        slots: &GuildSlots,
        name: &str,
        source: ImageSource,
        reason: &str,
    ) -> EmoteResult<AddOutcome> {
        // Checked before the download so a limited guild costs no bandwidth.
        self.client.check_create(slots.guild)?;

        let data = match source {
            ImageSource::Url { url, trusted } => self
                .fetcher
                .fetch(&url, IMAGE_MIMETYPES, !trusted)
                .await
                .map_err(|e| match e {
                    EmoteError::InvalidFile => EmoteError::InvalidImage,
                    e => e,
                })?,
            ImageSource::Bytes(data) => data,
        };

        let mut image = ImageBlob::new(data)?;

        if slots.counts.static_full(slots.limit) && slots.counts.animated_full(slots.limit) {
            return Err(EmoteError::NoSlotsAvailable);
        }

        let mut converted = false;
        if !image.mime().is_animated() && slots.counts.static_full(slots.limit) {
            debug!("no static slots left in {}, converting {} to a GIF", slots.guild, name);
            image = self
                .worker
                .submit(Operation::Convert, image, self.settings.convert_timeout)
                .await?;
            converted = true;
        }

        if image.len() > EMOTE_SIZE_LIMIT {
            debug!("{} is {} bytes, shrinking", name, image.len());
            image = self
                .worker
                .submit(Operation::Resize, image, self.settings.shrink_timeout)
                .await?;
        }

        let emote = self
            .client
            .create(slots.guild, name, &image, &[], Some(reason))
            .await?;
        info!("created emote {} ({}) in guild {}", emote.name, emote.id, slots.guild);

        Ok(AddOutcome { emote, converted })
    }

    /// [`add_emote`](Self::add_emote), rendered for the user either way.
    ///
    /// A created emote is counted in `slots`, so repeated calls see it.
    pub async fn add_emote_message(
        &self,
        slots: &mut GuildSlots,
        name: &str,
        source: ImageSource,
        reason: &str,
    ) -> String {
        match self.add_emote(slots, name, source, reason).await {
            Ok(outcome) => {
                slots.counts.record(outcome.emote.animated);
                outcome.message()
            }
            Err(e) => {
                self.log_failure(name, &e);
                self.render_error(name, &e)
            }
        }
    }

    /// Add every image in `archive`, one report per member.
    ///
    /// Members that are not images are skipped without a report. The stream
    /// ends early when the guild runs out of slots, gets rate limited, or hits
    /// an error that is not the user's fault.
    pub fn import_archive<'a>(
        &'a self,
        slots: GuildSlots,
        archive: Bytes,
        reason: &'a str,
    ) -> EmoteResult<impl Stream<Item = String> + Send + 'a> {
        let entries = extract_stream(archive, self.settings.archive_size_limit)?.boxed();
        let state = ImportState {
            entries,
            slots,
            stopped: false,
        };

        Ok(stream::unfold(state, move |mut state| async move {
            if state.stopped {
                return None;
            }
            loop {
                let entry = state.entries.next().await?;
                match self.import_entry(&mut state.slots, entry, reason).await {
                    ImportStep::Skipped => continue,
                    ImportStep::Report(message) => return Some((message, state)),
                    ImportStep::Stop(message) => {
                        state.stopped = true;
                        return Some((message, state));
                    }
                }
            }
        }))
    }

    async fn import_entry(&self, slots: &mut GuildSlots, entry: ArchiveEntry, reason: &str) -> ImportStep {
        let data = match entry.content {
            Ok(data) => data,
            Err(e) => {
                self.log_failure(&entry.name, &e);
                return ImportStep::Report(self.render_error(&entry.name, &e));
            }
        };

        if classify(&data).is_err() {
            debug!("skipping {}: not an image", entry.name);
            return ImportStep::Skipped;
        }

        let name = emote_name_from_path(&entry.name);
        match self.add_emote(slots, &name, ImageSource::Bytes(data), reason).await {
            Ok(outcome) => {
                slots.counts.record(outcome.emote.animated);
                ImportStep::Report(outcome.message())
            }
            Err(e) => {
                self.log_failure(&name, &e);
                let message = self.render_error(&name, &e);
                let fatal = matches!(
                    e,
                    EmoteError::NoSlotsAvailable | EmoteError::RateLimited { .. }
                ) || !e.is_expected();
                if fatal {
                    ImportStep::Stop(message)
                } else {
                    ImportStep::Report(message)
                }
            }
        }
    }

    fn log_failure(&self, name: &str, error: &EmoteError) {
        if error.is_expected() {
            debug!("{}: {}", name, error);
        } else {
            warn!("{}: {}", name, error);
        }
    }

    /// The user facing text for a failed operation on the emote `name`.
    pub fn render_error(&self, name: &str, error: &EmoteError) -> String {
        let message = match error {
            EmoteError::InvalidImage => format!(
                "{}: The file supplied was not a valid GIF, PNG, JPEG, or WEBP file.",
                name
            ),
            EmoteError::InvalidArchive => {
                "Error: the file supplied was not a valid zip or tar archive.".to_string()
            }
            EmoteError::InvalidFile => "Invalid file given.".to_string(),
            EmoteError::FileTooBig { size, limit } => format!(
                "{}: file too big. The limit is {} but this file is {}.",
                name,
                natural_size(*limit),
                natural_size(*size)
            ),
            EmoteError::ProcessingTimeout {
                operation: Operation::Resize,
            } => "Error: resizing the image took too long.".to_string(),
            EmoteError::ProcessingTimeout {
                operation: Operation::Convert,
            } => "Error: converting the image to a GIF took too long.".to_string(),
            EmoteError::RateLimited { retry_at } => format!(
                "Error: Discord told me to slow down! Please retry this command in {}.",
                natural_delta(retry_at.saturating_duration_since(Instant::now()))
            ),
            EmoteError::RemoteHttp {
                status,
                reason,
                detail,
            } => format!(
                "{}: An error occurred while creating the the emote:\n{} (status code: {}):\n{}",
                name, reason, status, detail
            ),
            EmoteError::NoSlotsAvailable => format!(
                "This server is out of emote slots. Check `{}stats` to view your servers limits",
                self.settings.command_prefix
            ),
            EmoteError::FetchTimeout => "Error: retrieving the image took too long.".to_string(),
            EmoteError::InvalidUrl => "Error: Invalid URL.".to_string(),
            EmoteError::FetchStatus(status) => {
                format!("URL error: server returned error code {}", status)
            }
            EmoteError::Fetch(_) => {
                "An error occurred while retrieving the file.".to_string()
            }
            EmoteError::EmoteNotFound(missing) => {
                format!("An emote called `{}` does not exist in this server.", missing)
            }
            EmoteError::WorkerFailed { .. } | EmoteError::Io(_) => {
                format!("{}: An internal error occurred while processing the image.", name)
            }
        };
        escape_mentions(&message)
    }
}

struct ImportState {
    entries: BoxStream<'static, ArchiveEntry>,
    slots: GuildSlots,
    stopped: bool,
}

enum ImportStep {
    Skipped,
    Report(String),
    Stop(String),
}

/// Emote name for an uploaded file, following the platform's own rules:
/// `emotes/blob cat-1.png` becomes `blobcat`.
pub fn emote_name_from_path(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    let stem = match base.rfind('.') {
        Some(dot) if !base[..dot].trim_start_matches('.').is_empty() => &base[..dot],
        _ => base,
    };
    let stem = match stem.rsplit_once('-') {
        Some(("", right)) => right,
        Some((left, _)) => left,
        None => stem,
    };
    stem.replace(' ', "")
}

/// Break mass and user mentions in text echoed back to a channel.
pub fn escape_mentions(text: &str) -> String {
    text.replace("@everyone", "@\u{200b}everyone")
        .replace("@here", "@\u{200b}here")
        .replace("<@", "<@\u{200b}")
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::archive::extract::tests::tar_of;
    use crate::emotes::ratelimit::{GuildRateLimiter, VerbClass};
    use crate::image::fixtures::{animated_gif, noise_png, solid_png};
    use crate::image::{MimeType, ThreadWorker};

    const GUILD: GuildId = 1;
    const REASON: &str = "Created by @tester (2)";

    struct Harness {
        server: MockServer,
        limiter: Arc<GuildRateLimiter>,
        ingestor: Ingestor,
    }

    async fn harness(settings: IngestSettings) -> Harness {
        let server = MockServer::start().await;
        let limiter = Arc::new(GuildRateLimiter::new());
        let http = reqwest::Client::new();
        let client = EmoteClient::new(http.clone(), server.uri(), "t0ken", limiter.clone());
        let fetcher = Fetcher::new(http, Duration::from_secs(5), Duration::from_secs(5));
        let ingestor = Ingestor::new(
            fetcher,
            Arc::new(client),
            Arc::new(ThreadWorker),
            settings,
            StatusEmojis::default(),
        );
        Harness {
            server,
            limiter,
            ingestor,
        }
    }

    async fn serve_image(server: &MockServer, route: &str, data: Vec<u8>, content_type: &str) {
        Mock::given(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_raw(data, content_type))
            .mount(server)
            .await;
    }

    /// Accept emote creation, echoing back whether the upload was a GIF.
    async fn accept_creates(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(format!("/guilds/{}/emojis", GUILD)))
            .respond_with(|request: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&request.body).unwrap();
                let animated = body["image"]
                    .as_str()
                    .unwrap()
                    .starts_with("data:image/gif");
                ResponseTemplate::new(201).set_body_json(json!({
                    "id": "379127000398430219",
                    "name": body["name"],
                    "animated": animated,
                }))
            })
            .mount(server)
            .await;
    }

    /// Decode the images sent to the create endpoint.
    async fn uploaded_images(server: &MockServer) -> Vec<ImageBlob> {
        server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|request| request.method.as_str() == "POST")
            .map(|request| {
                let body: Value = serde_json::from_slice(&request.body).unwrap();
                let url = body["image"].as_str().unwrap().to_string();
                let (_, payload) = url.split_once(";base64,").unwrap();
                ImageBlob::new(STANDARD.decode(payload).unwrap()).unwrap()
            })
            .collect()
    }

    fn slots(static_count: usize, animated_count: usize) -> GuildSlots {
        GuildSlots {
            guild: GUILD,
            counts: EmoteCounts::new(static_count, animated_count),
            limit: 50,
        }
    }

    #[tokio::test]
    async fn test_oversized_png_is_shrunk_before_upload() {
        let h = harness(IngestSettings::default()).await;
        let png = noise_png(360, 360, 3);
        assert!(png.len() > 500_000);
        serve_image(&h.server, "/big.png", png, "image/png").await;
        accept_creates(&h.server).await;

        let url = format!("{}/big.png", h.server.uri());
        let outcome = h
            .ingestor
            .add_emote(&slots(0, 0), "big", ImageSource::url(url), REASON)
            .await
            .unwrap();
        assert!(!outcome.converted);
        assert_eq!(outcome.message(), "Emote <:big:379127000398430219> successfully created.");

        let uploads = uploaded_images(&h.server).await;
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].len() <= EMOTE_SIZE_LIMIT);
        assert_eq!(uploads[0].mime(), MimeType::Png);
    }

    #[tokio::test]
    async fn test_static_image_converted_when_static_slots_full() {
        let h = harness(IngestSettings::default()).await;
        accept_creates(&h.server).await;

        let source = ImageSource::Bytes(Bytes::from(solid_png(64, 64)));
        let outcome = h
            .ingestor
            .add_emote(&slots(50, 10), "blob", source, REASON)
            .await
            .unwrap();

        assert!(outcome.converted);
        assert!(outcome.emote.animated);
        assert!(outcome.message().ends_with("successfully created as a GIF."));
        assert_eq!(uploaded_images(&h.server).await[0].mime(), MimeType::Gif);
    }

    #[tokio::test]
    async fn test_no_slots_fails_without_upload() {
        let h = harness(IngestSettings::default()).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&h.server)
            .await;

        let source = ImageSource::Bytes(Bytes::from(solid_png(8, 8)));
        let result = h.ingestor.add_emote(&slots(50, 50), "x", source, REASON).await;
        assert!(matches!(result, Err(EmoteError::NoSlotsAvailable)));
    }

    #[tokio::test]
    async fn test_rate_limited_guild_skips_download() {
        let h = harness(IngestSettings::default()).await;
        Mock::given(path("/cat.png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&h.server)
            .await;
        h.limiter
            .record_limited(GUILD, VerbClass::Create, Duration::from_secs(600));

        let url = format!("{}/cat.png", h.server.uri());
        let message = h
            .ingestor
            .add_emote_message(&mut slots(0, 0), "cat", ImageSource::url(url), REASON)
            .await;
        assert!(message.starts_with("Error: Discord told me to slow down!"));
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_invalid_image() {
        let h = harness(IngestSettings::default()).await;
        serve_image(&h.server, "/page", b"<html>".to_vec(), "text/html").await;

        let url = format!("{}/page", h.server.uri());
        let message = h
            .ingestor
            .add_emote_message(&mut slots(0, 0), "page", ImageSource::url(url), REASON)
            .await;
        assert_eq!(
            message,
            "page: The file supplied was not a valid GIF, PNG, JPEG, or WEBP file."
        );
    }

    #[tokio::test]
    async fn test_import_reports_oversized_member_and_continues() {
        let settings = IngestSettings {
            archive_size_limit: 5 * 1024 * 1024,
            ..IngestSettings::default()
        };
        let h = harness(settings).await;
        accept_creates(&h.server).await;

        let big = vec![0u8; 10 * 1024 * 1024];
        let gif = animated_gif(16, 16, 2);
        let archive = tar_of(&[
            ("big.png", &big),
            ("readme.txt", b"not an image"),
            ("party-blob.gif", &gif),
        ]);

        let reports: Vec<String> = h
            .ingestor
            .import_archive(slots(0, 0), archive, REASON)
            .unwrap()
            .collect()
            .await;

        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports[0],
            "big.png: file too big. The limit is 5.2 MB but this file is 10.5 MB."
        );
        assert_eq!(
            reports[1],
            "Emote <a:party:379127000398430219> successfully created."
        );
    }

    #[tokio::test]
    async fn test_import_stops_when_slots_run_out() {
        let h = harness(IngestSettings::default()).await;
        accept_creates(&h.server).await;

        let gif = animated_gif(8, 8, 2);
        let archive = tar_of(&[("a.gif", &gif), ("b.gif", &gif), ("c.gif", &gif)]);
        let slots = GuildSlots {
            guild: GUILD,
            counts: EmoteCounts::new(50, 49),
            limit: 50,
        };

        let reports: Vec<String> = h
            .ingestor
            .import_archive(slots, archive, REASON)
            .unwrap()
            .collect()
            .await;

        assert_eq!(reports.len(), 2);
        assert!(reports[0].starts_with("Emote <a:a:"));
        assert!(reports[1].starts_with("This server is out of emote slots."));
        assert_eq!(uploaded_images(&h.server).await.len(), 1);
    }

    #[tokio::test]
    async fn test_import_rejects_non_archive() {
        let h = harness(IngestSettings::default()).await;
        let result = h
            .ingestor
            .import_archive(slots(0, 0), Bytes::from_static(b"plain text"), REASON);
        assert!(matches!(result, Err(EmoteError::InvalidArchive)));
    }

    #[tokio::test]
    async fn test_render_errors() {
        let h = harness(IngestSettings::default()).await;
        let render = |e: EmoteError| h.ingestor.render_error("blob", &e);

        assert_eq!(
            render(EmoteError::RemoteHttp {
                status: 400,
                reason: "Bad Request".to_string(),
                detail: "Invalid Form Body".to_string(),
            }),
            "blob: An error occurred while creating the the emote:\nBad Request (status code: 400):\nInvalid Form Body"
        );
        assert_eq!(
            render(EmoteError::NoSlotsAvailable),
            "This server is out of emote slots. Check `em/stats` to view your servers limits"
        );
        assert_eq!(
            render(EmoteError::FetchStatus(404)),
            "URL error: server returned error code 404"
        );
        assert_eq!(
            render(EmoteError::ProcessingTimeout {
                operation: Operation::Convert
            }),
            "Error: converting the image to a GIF took too long."
        );
        assert!(!render(EmoteError::Fetch("dns error: secret.internal".to_string()))
            .contains("secret"));
    }

    #[test]
    fn test_emote_name_from_path() {
        assert_eq!(emote_name_from_path("emotes/blob-cat-1.png"), "blob-cat");
        assert_eq!(emote_name_from_path("thonk.gif"), "thonk");
        assert_eq!(emote_name_from_path("-wave.png"), "wave");
        assert_eq!(emote_name_from_path("big smile.jpg"), "bigsmile");
        assert_eq!(emote_name_from_path(".hidden"), ".hidden");
    }

    #[test]
    fn test_escape_mentions() {
        assert_eq!(escape_mentions("@everyone hi"), "@\u{200b}everyone hi");
        assert_eq!(escape_mentions("<@123>"), "<@\u{200b}123>");
    }
}
