//! Locally attached serial sensor.
//!
//! The board streams one JSON object per line, e.g.
//! `{"pm25": 12.1, "no2": 40.2, "o3": 61.0, "co": 0.4, "humidity": 55}`.
//! A background task keeps the most recent valid frame; an ingestion turns
//! it into a length-1 series per signal. After each update cycle the link
//! writes the recommendation flags back to the board as a JSON line.
//!
//! The serial line itself (baud rate, framing) must be configured before the
//! device is opened, e.g. with `stty -F /dev/ttyUSB0 9600 raw`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ReadingsSource, SnapshotSink};
use crate::error::{AtmosError, Result};
use crate::model::{Location, RawReadings, Sample, Snapshot};

/// One reading frame sent by the board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    #[serde(default, alias = "PM25", alias = "pm2_5")]
    pub pm25: Option<f64>,

    #[serde(default, alias = "NO2")]
    pub no2: Option<f64>,

    #[serde(default, alias = "O3")]
    pub o3: Option<f64>,

    #[serde(default, alias = "CO")]
    pub co: Option<f64>,

    #[serde(default, alias = "rh")]
    pub humidity: Option<f64>,

    /// Host-side receive time; the board has no clock.
    #[serde(skip)]
    pub received_at: DateTime<Utc>,
}

impl SensorFrame {
    /// Parse one line from the board.
    pub fn parse(line: &str, received_at: DateTime<Utc>) -> serde_json::Result<Self> {
        let mut frame: SensorFrame = serde_json::from_str(line.trim())?;
        frame.received_at = received_at;
        Ok(frame)
    }

    /// Turn the frame into single-sample series for every field present.
    pub fn to_readings(&self) -> RawReadings {
        let mut raw = RawReadings::default();
        let fields = [
            ("pm2p5", self.pm25),
            ("no2", self.no2),
            ("o3", self.o3),
            ("co", self.co),
            ("relative_humidity", self.humidity),
        ];
        for (parameter, value) in fields {
            if let Some(value) = value {
                raw.insert_parameter(parameter, vec![Sample::new(self.received_at, value)]);
            }
        }
        raw
    }
}

/// Frame written back to the board after each update cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationFrame {
    pub close_windows: bool,
    pub run_purifier: bool,
    pub wear_masks: bool,
    pub manage_humidity: bool,
    pub time_category: u8,
}

impl From<&Snapshot> for RecommendationFrame {
    fn from(snapshot: &Snapshot) -> Self {
        let r = snapshot.recommendations;
        Self {
            close_windows: r.close_windows,
            run_purifier: r.run_purifier,
            wear_masks: r.wear_masks,
            manage_humidity: r.manage_humidity,
            time_category: snapshot.time_category,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bidirectional link to the serial sensor board.
pub struct SensorLink {
    frames: watch::Receiver<Option<SensorFrame>>,
    max_frame_age: Option<Duration>,
    writer: Mutex<BoxedWriter>,
    reader_task: JoinHandle<()>,
}

impl SensorLink {
    /// Open a serial device (e.g. `/dev/ttyUSB0`) for reading and writing.
    pub async fn open(path: &Path) -> Result<Self> {
        let reader = tokio::fs::File::open(path).await?;
        let writer = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        info!(port = %path.display(), "Sensor port opened");
        Ok(Self::new(BufReader::new(reader), writer))
    }

    /// Build a link over arbitrary streams. Must be called within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let reader_task = tokio::spawn(read_frames(reader, tx));
        Self {
            frames: rx,
            max_frame_age: None,
            writer: Mutex::new(Box::new(writer)),
            reader_task,
        }
    }

    /// Refuse frames older than `age` at ingestion time.
    pub fn with_max_frame_age(mut self, age: Duration) -> Self {
        self.max_frame_age = Some(age);
        self
    }

    /// Whether the background reader has stopped (EOF or read error).
    pub fn is_closed(&self) -> bool {
        self.frames.has_changed().is_err()
    }

    /// The most recent valid frame, if any arrived yet.
    pub fn latest(&self) -> Option<SensorFrame> {
        self.frames.borrow().clone()
    }

    /// Subscribe to frame updates.
    pub fn subscribe(&self) -> watch::Receiver<Option<SensorFrame>> {
        self.frames.clone()
    }

    /// Write the recommendation flags of a snapshot to the board.
    pub async fn send_recommendations(&self, snapshot: &Snapshot) -> Result<()> {
        let frame = RecommendationFrame::from(snapshot);
        let mut line = serde_json::to_string(&frame)
            .map_err(|e| AtmosError::UpstreamUnavailable(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        debug!(?frame, "Recommendations sent to sensor");
        Ok(())
    }
}

impl Drop for SensorLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_frames<R>(reader: R, tx: watch::Sender<Option<SensorFrame>>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match SensorFrame::parse(&line, Utc::now()) {
                Ok(frame) => {
                    debug!(?frame, "Sensor frame received");
                    tx.send_replace(Some(frame));
                }
                Err(e) => warn!(line = %line.trim(), error = %e, "Failed to parse sensor frame"),
            },
            Ok(None) => {
                info!("Sensor stream closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Sensor read error");
                break;
            }
        }
    }
}

#[async_trait]
impl ReadingsSource for SensorLink {
    async fn fetch(&self, _location: &Location) -> Result<RawReadings> {
        if self.is_closed() {
            return Err(AtmosError::UpstreamUnavailable(
                "sensor stream closed".to_string(),
            ));
        }

        let Some(frame) = self.latest() else {
            return Err(AtmosError::NoData);
        };

        if let Some(max_age) = self.max_frame_age {
            let age = (Utc::now() - frame.received_at).to_std().unwrap_or_default();
            if age > max_age {
                return Err(AtmosError::UpstreamUnavailable(format!(
                    "last sensor frame is {}s old",
                    age.as_secs()
                )));
            }
        }

        let raw = frame.to_readings();
        if raw.is_empty() {
            return Err(AtmosError::NoData);
        }
        Ok(raw)
    }
}

#[async_trait]
impl SnapshotSink for SensorLink {
    async fn publish(&self, snapshot: &Snapshot) -> Result<()> {
        self.send_recommendations(snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PollutantKind, Recommendations};
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    /// Returns the link plus the board-side ends (board writes, board reads).
    fn link_pair() -> (SensorLink, DuplexStream, DuplexStream) {
        let (board_out, link_in) = duplex(1024);
        let (link_out, board_in) = duplex(1024);
        let link = SensorLink::new(BufReader::new(link_in), link_out);
        (link, board_out, board_in)
    }

    #[test]
    fn test_parse_frame_with_aliases() {
        let now = Utc::now();
        let frame = SensorFrame::parse(r#"{"PM25": 20.5, "CO": 3, "humidity": 58}"#, now).unwrap();

        assert_eq!(frame.pm25, Some(20.5));
        assert_eq!(frame.co, Some(3.0));
        assert_eq!(frame.no2, None);
        assert_eq!(frame.received_at, now);

        let raw = frame.to_readings();
        assert_eq!(raw.series(PollutantKind::Pm25).unwrap().len(), 1);
        assert_eq!(raw.current(PollutantKind::Co), 3.0);
        assert!(raw.series(PollutantKind::No2).is_none());
        assert_eq!(raw.current_humidity(), 58.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SensorFrame::parse("pm25=12", Utc::now()).is_err());
    }

    #[tokio::test]
    async fn test_no_frame_is_no_data() {
        let (link, _board_out, _board_in) = link_pair();
        let result = link.fetch(&Location::new("here", 0.0, 0.0)).await;
        assert!(matches!(result, Err(AtmosError::NoData)));
    }

    #[tokio::test]
    async fn test_latest_frame_wins() {
        let (link, mut board_out, _board_in) = link_pair();
        let mut frames = link.subscribe();

        board_out
            .write_all(b"{\"pm25\": 10}\nnot json\n\n{\"pm25\": 30, \"o3\": 80}\n")
            .await
            .unwrap();

        frames
            .wait_for(|f| f.as_ref().and_then(|f| f.o3).is_some())
            .await
            .unwrap();

        let raw = link.fetch(&Location::new("here", 0.0, 0.0)).await.unwrap();
        assert_eq!(raw.current(PollutantKind::Pm25), 30.0);
        assert_eq!(raw.current(PollutantKind::O3), 80.0);
    }

    #[tokio::test]
    async fn test_closed_stream_is_unavailable() {
        let (link, mut board_out, _board_in) = link_pair();
        let mut frames = link.subscribe();

        board_out.write_all(b"{\"pm25\": 12}\n").await.unwrap();
        frames.wait_for(|f| f.is_some()).await.unwrap();
        assert!(link.fetch(&Location::new("here", 0.0, 0.0)).await.is_ok());

        drop(board_out);
        while frames.changed().await.is_ok() {}

        assert!(link.is_closed());
        let result = link.fetch(&Location::new("here", 0.0, 0.0)).await;
        assert!(matches!(result, Err(AtmosError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_stale_frame_is_unavailable() {
        let (link, mut board_out, _board_in) = link_pair();
        let link = link.with_max_frame_age(Duration::from_millis(1));
        let mut frames = link.subscribe();

        board_out.write_all(b"{\"no2\": 40}\n").await.unwrap();
        frames.wait_for(|f| f.is_some()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = link.fetch(&Location::new("here", 0.0, 0.0)).await;
        assert!(matches!(result, Err(AtmosError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_send_recommendations() {
        let (link, _board_out, mut board_in) = link_pair();

        let snapshot = Snapshot {
            time_category: 2,
            recommendations: Recommendations {
                close_windows: true,
                run_purifier: false,
                wear_masks: false,
                manage_humidity: true,
            },
            ..Snapshot::default()
        };
        link.publish(&snapshot).await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = board_in.read(&mut buf).await.unwrap();
        let line = std::str::from_utf8(&buf[..n]).unwrap();

        assert!(line.ends_with('\n'));
        let json: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(json["close_windows"], true);
        assert_eq!(json["manage_humidity"], true);
        assert_eq!(json["time_category"], 2);
    }
}
