//! The physical link owned by the state machine and the reader task that
//! drains it.
//!
//! Every opening gets a fresh generation number. The reader task tags what it
//! submits with that number so results of a link that has since been closed
//! can be told apart and dropped.

use log::{debug, trace};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::constants::WRONG_BAUDRATE_BYTE_THRESHOLD;
use crate::device::dispatcher::Command;
use crate::device::port::{MeterPort, PortError, PortErrorKind, PortStream};
use crate::p1::reader::TelegramReader;
use crate::util::logging::log_frame_hex;

const READ_BUFFER_SIZE: usize = 2048;

pub(crate) enum Link {
    /// No transport built yet, or released.
    Unconfigured,
    Closed {
        port: Box<dyn MeterPort>,
    },
    Open {
        port: Box<dyn MeterPort>,
        reader: JoinHandle<()>,
    },
}

impl Link {
    /// Stop the reader and close the port, keeping the transport for reuse.
    pub(crate) async fn close(self) -> Option<Box<dyn MeterPort>> {
        match self {
            Link::Unconfigured => None,
            Link::Closed { port } => Some(port),
            Link::Open { mut port, reader } => {
                reader.abort();
                port.close().await;
                Some(port)
            }
        }
    }

    /// Stop the reader without waiting for the port.
    pub(crate) fn abort_reader(&self) {
        if let Link::Open { reader, .. } = self {
            reader.abort();
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Link::Unconfigured => "no link".to_string(),
            Link::Closed { port } => format!("{} (closed)", port.describe()),
            Link::Open { port, .. } => port.describe(),
        }
    }
}

/// Start draining `stream` into `reader`.
pub(crate) fn spawn_reader(
    stream: PortStream,
    reader: TelegramReader,
    generation: u64,
    commands: UnboundedSender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(read_loop(stream, reader, generation, commands))
}

async fn read_loop(
    mut stream: PortStream,
    mut reader: TelegramReader,
    generation: u64,
    commands: UnboundedSender<Command>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut total_bytes = 0usize;
    let mut wrong_speed_reported = false;

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("Link {generation} reached end of stream");
                let error = PortError::new(PortErrorKind::Closed, "end of stream");
                let _ = commands.send(Command::PortFailure { generation, error });
                return;
            }
            Ok(n) => n,
            Err(e) => {
                let error = PortError::from_read(&e);
                debug!("Link {generation} read failed: {error}");
                let _ = commands.send(Command::PortFailure { generation, error });
                return;
            }
        };

        log_frame_hex("P1 bytes", &buf[..n]);
        total_bytes += n;

        for batch in reader.feed(&buf[..n]) {
            trace!("Link {generation}: {} objects", batch.objects.len());
            if commands.send(Command::Telegram { generation, batch }).is_err() {
                return;
            }
        }

        if !wrong_speed_reported
            && reader.telegrams_recognised() == 0
            && total_bytes > WRONG_BAUDRATE_BYTE_THRESHOLD
        {
            wrong_speed_reported = true;
            let error = PortError::new(
                PortErrorKind::WrongBaudrate,
                format!("{total_bytes} bytes without a recognisable telegram"),
            );
            if commands.send(Command::PortFailure { generation, error }).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_eof_reports_closed() {
        let (device_side, meter_side) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_reader(Box::new(device_side), TelegramReader::plain(false), 3, tx);
        drop(meter_side);

        match rx.recv().await {
            Some(Command::PortFailure { generation, error }) => {
                assert_eq!(generation, 3);
                assert_eq!(error.kind, PortErrorKind::Closed);
            }
            _ => panic!("expected a port failure"),
        }
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_noise_reports_wrong_speed_once() {
        let (device_side, mut meter_side) = tokio::io::duplex(16 * 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = spawn_reader(Box::new(device_side), TelegramReader::plain(false), 1, tx);

        let noise = vec![0xAAu8; WRONG_BAUDRATE_BYTE_THRESHOLD * 2];
        meter_side.write_all(&noise).await.unwrap();
        meter_side.write_all(&noise).await.unwrap();
        drop(meter_side);

        let mut wrong_speed = 0;
        while let Some(command) = rx.recv().await {
            if let Command::PortFailure { error, .. } = command {
                match error.kind {
                    PortErrorKind::WrongBaudrate => wrong_speed += 1,
                    PortErrorKind::Closed => break,
                    other => panic!("unexpected {other}"),
                }
            }
        }
        assert_eq!(wrong_speed, 1);
    }
}
