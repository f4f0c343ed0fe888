//! Regenerates the published files for all parsers and canteens.

use std::path::{Path, PathBuf};

use mensa_core::{FeedKind, MensaService, ParserId, PortError, UrlTemplate};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::index;

/// Which documents an update writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Artifacts {
    pub(crate) json: bool,
    pub(crate) meta: bool,
    pub(crate) feed: bool,
    pub(crate) today: bool,
    pub(crate) index: bool,
}

impl Artifacts {
    fn needs_parsers(self) -> bool {
        self.json || self.meta || self.feed || self.today
    }
}

#[derive(Debug, Clone)]
pub(crate) struct UpdateOptions {
    pub(crate) artifacts: Artifacts,
    pub(crate) parser: Option<String>,
    pub(crate) canteen: Option<String>,
    pub(crate) base_url: String,
    pub(crate) out: PathBuf,
}

/// Run one update and return the recorded error lines, a heading followed by the message.
///
/// Failures of single canteens are recorded and the run continues. A network failure on
/// the first canteen of a parser skips the rest of that parser; later network failures
/// are only logged.
///
/// # Errors
///
/// Returns an error if the index page cannot be written.
pub(crate) async fn run(service: &MensaService, options: &UpdateOptions) -> anyhow::Result<Vec<String>> {
    let mut errors = Vec::new();

    if options.artifacts.needs_parsers() {
        let parsers = service.parsers();
        if let Some(selected) = &options.parser {
            if !parsers.iter().any(|(parser, _)| &parser.0 == selected) {
                warn!(parser = selected.as_str(), "no such parser");
                errors.push(format!("{selected}:"));
                errors.push(PortError::UnknownParser(selected.clone()).to_string());
            }
        }

        for (parser, name) in parsers {
            if options.parser.as_ref().is_some_and(|selected| selected != &parser.0) {
                continue;
            }
            info!(%parser, %name, "updating parser");
            if let Err(failure) = update_parser(service, &parser, options, &mut errors).await {
                error!(%parser, error = %failure, "parser skipped");
                errors.push(format!("{parser}:"));
                errors.push(failure.to_string());
            }
        }
    }

    if options.artifacts.index {
        let path = index::write_index(&options.out, &options.base_url, &errors).await?;
        info!(path = %path.display(), "index written");
    }

    Ok(errors)
}

async fn update_parser(
    service: &MensaService,
    parser: &ParserId,
    options: &UpdateOptions,
    errors: &mut Vec<String>,
) -> Result<(), PortError> {
    if options.artifacts.json {
        let path = options.out.join(format!("{parser}.json"));
        write(&path, &service.json(parser)?).await?;
    }

    let kinds = kinds_to_write(service.feed_kinds(parser)?, options.artifacts);
    if !options.artifacts.meta && kinds.is_empty() {
        return Ok(());
    }

    let mut first = true;
    for reference in service.references(parser)? {
        if options.canteen.as_ref().is_some_and(|selected| selected != &reference) {
            continue;
        }
        info!(%parser, %reference, "updating canteen");
        match update_canteen(service, parser, &reference, &kinds, options).await {
            Ok(()) => {}
            Err(failure) if failure.is_network() && first => return Err(failure),
            Err(failure) if failure.is_network() => {
                error!(%parser, %reference, error = %failure, "canteen unreachable");
            }
            Err(failure) => {
                error!(%parser, %reference, error = %failure, "canteen failed");
                errors.push(format!("{parser}/{reference}:"));
                errors.push(failure.to_string());
            }
        }
        first = false;
    }
    Ok(())
}

async fn update_canteen(
    service: &MensaService,
    parser: &ParserId,
    reference: &str,
    kinds: &[FeedKind],
    options: &UpdateOptions,
) -> Result<(), PortError> {
    if options.artifacts.meta {
        let path = UrlTemplate::path(&options.out, &parser.0, "meta", reference);
        write(&path, &service.meta(parser, reference).await?).await?;
    }
    for &kind in kinds {
        let path = UrlTemplate::path(&options.out, &parser.0, kind.file_title(), reference);
        write(&path, &service.feed(parser, reference, kind).await?).await?;
    }
    Ok(())
}

/// The regular feed is the full one when available, else the week. Today feeds are
/// written for both `--feed` and `--today`.
fn kinds_to_write(supported: &[FeedKind], artifacts: Artifacts) -> Vec<FeedKind> {
    let mut kinds = Vec::new();
    if artifacts.feed {
        if let Some(kind) = [FeedKind::Full, FeedKind::Week]
            .into_iter()
            .find(|kind| supported.contains(kind))
        {
            kinds.push(kind);
        }
    }
    if (artifacts.feed || artifacts.today) && supported.contains(&FeedKind::Today) {
        kinds.push(FeedKind::Today);
    }
    kinds
}

async fn write(path: &Path, content: &str) -> Result<(), PortError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    fs::write(path, content).await?;
    debug!(path = %path.display(), bytes = content.len(), "written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use mensa_core::{MenuPort, ParserMeta, ParserPlugin, ParserRegistry};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[derive(Clone, Copy)]
    enum Failure {
        Healthy,
        LayoutOn(&'static str),
        NetworkOn(&'static str),
    }

    struct FakePort {
        meta: ParserMeta,
        failure: Failure,
    }

    impl FakePort {
        fn plugin(id: &str, failure: Failure) -> ParserPlugin {
            ParserPlugin::new(Self {
                meta: ParserMeta {
                    id: ParserId(id.to_owned()),
                    name: id.to_uppercase(),
                },
                failure,
            })
        }
    }

    fn network_error() -> PortError {
        reqwest::Client::new()
            .get("not a url")
            .build()
            .expect_err("url is invalid")
            .into()
    }

    #[async_trait]
    impl MenuPort for FakePort {
        fn parser(&self) -> &ParserMeta {
            &self.meta
        }

        fn references(&self) -> Vec<String> {
            vec![String::from("alpha"), String::from("beta")]
        }

        fn feed_kinds(&self) -> &'static [FeedKind] {
            &[FeedKind::Week, FeedKind::Today]
        }

        fn json(&self, urls: &UrlTemplate) -> Result<String, PortError> {
            Ok(format!("{{\"alpha\": \"{}\"}}", urls.meta("alpha")))
        }

        async fn meta(&self, reference: &str, _urls: &UrlTemplate) -> Result<String, PortError> {
            Ok(format!("<meta>{reference}</meta>"))
        }

        async fn feed(&self, reference: &str, kind: FeedKind) -> Result<String, PortError> {
            match self.failure {
                Failure::LayoutOn(broken) if broken == reference => {
                    Err(PortError::Layout(String::from("broken")))
                }
                Failure::NetworkOn(broken) if broken == reference => Err(network_error()),
                _ => Ok(format!("<feed kind=\"{}\">{reference}</feed>", kind.file_title())),
            }
        }
    }

    fn service(plugins: Vec<ParserPlugin>) -> MensaService {
        MensaService::new(Arc::new(ParserRegistry::new(plugins)), "https://example.org/mensa/")
    }

    fn options(dir: &TempDir, artifacts: Artifacts) -> UpdateOptions {
        UpdateOptions {
            artifacts,
            parser: None,
            canteen: None,
            base_url: String::from("https://example.org/mensa/"),
            out: dir.path().to_path_buf(),
        }
    }

    const DEFAULT: Artifacts = Artifacts {
        json: true,
        meta: true,
        feed: true,
        today: false,
        index: true,
    };

    fn read(dir: &TempDir, relative: &str) -> String {
        std::fs::read_to_string(dir.path().join(relative)).expect("file written")
    }

    #[test]
    fn regular_feed_prefers_full() {
        let feed_only = Artifacts {
            json: false,
            meta: false,
            feed: true,
            today: false,
            index: false,
        };
        let today_only = Artifacts {
            feed: false,
            today: true,
            ..feed_only
        };
        assert_eq!(
            kinds_to_write(&[FeedKind::Week, FeedKind::Full, FeedKind::Today], feed_only),
            vec![FeedKind::Full, FeedKind::Today]
        );
        assert_eq!(kinds_to_write(&[FeedKind::Week], feed_only), vec![FeedKind::Week]);
        assert_eq!(kinds_to_write(&[FeedKind::Today], feed_only), vec![FeedKind::Today]);
        assert_eq!(kinds_to_write(&[FeedKind::Week], today_only), Vec::<FeedKind>::new());
    }

    #[tokio::test]
    async fn writes_every_document() {
        let dir = TempDir::new().expect("temp dir");
        let service = service(vec![FakePort::plugin("fake", Failure::Healthy)]);

        let errors = run(&service, &options(&dir, DEFAULT)).await.expect("run completes");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");

        assert_eq!(
            read(&dir, "fake.json"),
            "{\"alpha\": \"https://example.org/mensa/meta/fake_alpha.xml\"}"
        );
        assert_eq!(read(&dir, "meta/fake_beta.xml"), "<meta>beta</meta>");
        assert_eq!(read(&dir, "feed/fake_alpha.xml"), "<feed kind=\"feed\">alpha</feed>");
        assert_eq!(read(&dir, "today/fake_beta.xml"), "<feed kind=\"today\">beta</feed>");

        let index = read(&dir, "index.html");
        assert!(index.contains("https://example.org/mensa/fake.json"));
        assert!(index.contains("https://example.org/mensa/today/fake_beta.xml"));
        assert!(!index.contains("<pre>"));
    }

    #[tokio::test]
    async fn today_flag_writes_only_today_feeds() {
        let dir = TempDir::new().expect("temp dir");
        let service = service(vec![FakePort::plugin("fake", Failure::Healthy)]);
        let artifacts = Artifacts {
            json: false,
            meta: false,
            feed: false,
            today: true,
            index: false,
        };

        let errors = run(&service, &options(&dir, artifacts)).await.expect("run completes");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert!(dir.path().join("today/fake_alpha.xml").exists());
        assert!(!dir.path().join("feed").exists());
        assert!(!dir.path().join("meta").exists());
        assert!(!dir.path().join("fake.json").exists());
        assert!(!dir.path().join("index.html").exists());
    }

    #[tokio::test]
    async fn canteen_failure_is_recorded() {
        let dir = TempDir::new().expect("temp dir");
        let service = service(vec![FakePort::plugin("fake", Failure::LayoutOn("alpha"))]);

        let errors = run(&service, &options(&dir, DEFAULT)).await.expect("run completes");
        assert_eq!(
            errors,
            vec![
                String::from("fake/alpha:"),
                String::from("Unexpected page layout: broken")
            ]
        );
        assert!(!dir.path().join("feed/fake_alpha.xml").exists());
        assert!(dir.path().join("feed/fake_beta.xml").exists());
        assert!(read(&dir, "index.html").contains("<pre>fake/alpha:\nUnexpected page layout: broken</pre>"));
    }

    #[tokio::test]
    async fn network_failure_on_first_canteen_skips_parser() {
        let dir = TempDir::new().expect("temp dir");
        let service = service(vec![
            FakePort::plugin("down", Failure::NetworkOn("alpha")),
            FakePort::plugin("fake", Failure::Healthy),
        ]);

        let errors = run(&service, &options(&dir, DEFAULT)).await.expect("run completes");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.first().map(String::as_str), Some("down:"));
        assert!(!dir.path().join("meta/down_beta.xml").exists());
        assert!(dir.path().join("feed/fake_beta.xml").exists());
    }

    #[tokio::test]
    async fn later_network_failures_are_only_logged() {
        let dir = TempDir::new().expect("temp dir");
        let service = service(vec![FakePort::plugin("fake", Failure::NetworkOn("beta"))]);

        let errors = run(&service, &options(&dir, DEFAULT)).await.expect("run completes");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert!(dir.path().join("feed/fake_alpha.xml").exists());
        assert!(!dir.path().join("feed/fake_beta.xml").exists());
    }

    #[tokio::test]
    async fn selection_limits_parser_and_canteen() {
        let dir = TempDir::new().expect("temp dir");
        let service = service(vec![
            FakePort::plugin("fake", Failure::Healthy),
            FakePort::plugin("other", Failure::Healthy),
        ]);
        let mut options = options(&dir, DEFAULT);
        options.parser = Some(String::from("fake"));
        options.canteen = Some(String::from("beta"));

        let errors = run(&service, &options).await.expect("run completes");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert!(dir.path().join("feed/fake_beta.xml").exists());
        assert!(!dir.path().join("feed/fake_alpha.xml").exists());
        assert!(!dir.path().join("other.json").exists());
    }

    #[tokio::test]
    async fn unknown_parser_is_recorded() {
        let dir = TempDir::new().expect("temp dir");
        let service = service(vec![FakePort::plugin("fake", Failure::Healthy)]);
        let mut options = options(&dir, DEFAULT);
        options.parser = Some(String::from("nope"));

        let errors = run(&service, &options).await.expect("run completes");
        assert_eq!(errors, vec![String::from("nope:"), String::from("Unknown parser 'nope'")]);
    }
}
