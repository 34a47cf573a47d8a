//! Site adapters turning raw feed payloads into tasks.

use anyhow::Context as _;
use atom_syndication::Feed as AtomFeed;
use chrono::Utc;

use repost_core::subscription::Feed;
use repost_core::task::NewDownloadTask;
use repost_engine::subscriber::SiteAdapter;

/// Parses YouTube's WebSub Atom payloads (`yt:` extension elements).
pub struct YoutubeAdapter {
    auto_wait_secs: Option<i64>,
}

impl YoutubeAdapter {
    pub fn new(auto_wait_secs: Option<i64>) -> Self {
        Self { auto_wait_secs }
    }
}

impl SiteAdapter for YoutubeAdapter {
    fn parse_update(&self, xml: &str) -> anyhow::Result<Feed> {
        let feed = AtomFeed::read_from(xml.as_bytes()).context("parse atom payload")?;
        let entry = feed.entries().first().context("feed carries no entries")?;

        let yt = entry
            .extensions()
            .get("yt")
            .context("entry has no yt extension elements")?;
        let extension_text = |element: &str| -> anyhow::Result<String> {
            yt.get(element)
                .and_then(|found| found.first())
                .and_then(|extension| extension.value())
                .map(str::to_string)
                .with_context(|| format!("entry is missing yt:{element}"))
        };

        let video_url = entry
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .map(|link| link.href().to_string())
            .context("entry has no alternate link")?;
        let author = entry.authors().first().context("entry has no author")?;

        Ok(Feed {
            video_id: extension_text("videoId")?,
            video_title: entry.title().to_string(),
            video_url,
            channel_id: extension_text("channelId")?,
            channel_title: author.name().to_string(),
            channel_url: author.uri().unwrap_or_default().to_string(),
            site: "youtube".to_string(),
            update_time: entry.updated().with_timezone(&Utc),
        })
    }

    fn feed_to_task(&self, feed: &Feed) -> NewDownloadTask {
        let mut new = NewDownloadTask::new(&feed.video_title, &feed.video_url, &feed.site);
        if let Some(delay) = self.auto_wait_secs {
            new.wait_time = Some(Utc::now().timestamp() + delay);
        }
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015"
         xmlns="http://www.w3.org/2005/Atom">
  <link rel="hub" href="https://pubsubhubbub.appspot.com"/>
  <link rel="self" href="https://www.youtube.com/xml/feeds/videos.xml?channel_id=CHANNEL_ID"/>
  <title>YouTube video feed</title>
  <updated>2015-04-01T19:05:24.552394234+00:00</updated>
  <entry>
    <id>yt:video:VIDEO_ID</id>
    <yt:videoId>VIDEO_ID</yt:videoId>
    <yt:channelId>CHANNEL_ID</yt:channelId>
    <title>Video title</title>
    <link rel="alternate" href="http://www.youtube.com/watch?v=VIDEO_ID"/>
    <author>
     <name>Channel title</name>
     <uri>http://www.youtube.com/channel/CHANNEL_ID</uri>
    </author>
    <published>2015-03-06T21:40:57+00:00</published>
    <updated>2015-03-09T19:05:24.552394234+00:00</updated>
  </entry>
</feed>"#;

    #[test]
    fn parses_a_push_notification() {
        let adapter = YoutubeAdapter::new(None);
        let feed = adapter.parse_update(SAMPLE).unwrap();
        assert_eq!(feed.video_id, "VIDEO_ID");
        assert_eq!(feed.video_title, "Video title");
        assert_eq!(feed.video_url, "http://www.youtube.com/watch?v=VIDEO_ID");
        assert_eq!(feed.channel_id, "CHANNEL_ID");
        assert_eq!(feed.channel_title, "Channel title");
        assert_eq!(feed.channel_url, "http://www.youtube.com/channel/CHANNEL_ID");
        assert_eq!(feed.site, "youtube");
    }

    #[test]
    fn derives_a_download_task() {
        let adapter = YoutubeAdapter::new(None);
        let feed = adapter.parse_update(SAMPLE).unwrap();
        let task = adapter.feed_to_task(&feed);
        assert_eq!(task.name, "Video title");
        assert_eq!(task.url, "http://www.youtube.com/watch?v=VIDEO_ID");
        assert_eq!(task.site, "youtube");
        assert_eq!(task.wait_time, None);
    }

    #[test]
    fn auto_wait_sets_a_future_wait_time() {
        let adapter = YoutubeAdapter::new(Some(600));
        let feed = adapter.parse_update(SAMPLE).unwrap();
        let task = adapter.feed_to_task(&feed);
        assert!(task.wait_time.unwrap() > Utc::now().timestamp() + 500);
    }

    #[test]
    fn rejects_an_empty_feed() {
        let adapter = YoutubeAdapter::new(None);
        let empty = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>t</title><updated>2015-04-01T19:05:24Z</updated></feed>"#;
        assert!(adapter.parse_update(empty).is_err());
    }
}
