use std::future::Future;
use std::time::Duration;

use probelink_lib::protocol::slave::{byte_queue, pump, Device, Session};
use probelink_lib::protocol::{FramerConfig, FramerStats, END, START};
use probelink_lib::sim::SimTag;
use tokio::io::{duplex, split, AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::sleep;

async fn serve<F>(config: FramerConfig, tag: SimTag, device: DuplexStream, host: F) -> (FramerStats, SimTag)
where
    F: Future<Output = ()>,
{
    let (dev_read, dev_write) = split(device);
    let (tx, rx) = byte_queue();
    let mut session = Session::new(config, tag, dev_write, rx);

    let (pumped, served, ()) = tokio::join!(pump(dev_read, tx), session.run(), host);
    pumped.unwrap();
    served.unwrap();

    (session.framer().stats(), session.into_device())
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Vec<u8> {
    let mut frame = Vec::new();
    loop {
        let byte = reader.read_u8().await.unwrap();
        if byte == START {
            frame.clear();
        }
        if byte == START || !frame.is_empty() {
            frame.push(byte);
        }
        if byte == END && !frame.is_empty() {
            return frame;
        }
    }
}

#[tokio::test]
async fn answers_fragmented_requests() {
    let (host, device) = duplex(256);
    let (mut host_read, mut host_write) = split(host);

    let script = async move {
        host_write.write_all(&[0x5E, 0x02, 0x00, 0x05]).await.unwrap();
        host_write
            .write_all(&[0x78, 0x56, 0x24, 0x5E, 0x01, 0x00, 0x05, 0x24])
            .await
            .unwrap();

        assert_eq!(read_frame(&mut host_read).await, vec![0x5E, 0x02, 0x00, 0x24]);
        assert_eq!(
            read_frame(&mut host_read).await,
            vec![0x5E, 0x01, 0x00, 0x78, 0x56, 0x00, 0x00, 0x24]
        );
        host_write.shutdown().await.unwrap();
    };

    let (stats, tag) = serve(FramerConfig::default(), SimTag::new(0, vec![0x04]), device, script).await;
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.framing_errors, 0);
    assert_eq!(tag.block(5), Some(0x5678));
}

#[tokio::test]
async fn recovers_from_bad_frames() {
    let (host, device) = duplex(256);
    let (mut host_read, mut host_write) = split(host);

    let mut tag = SimTag::new(0, vec![0x04, 0x10]);
    tag.write(0, 2, &[0x24]).await.unwrap();

    let script = async move {
        host_write.write_all(&[0x00, 0x24]).await.unwrap();
        host_write
            .write_all(&[0x5E, 0x01, 0x5E, 0x00, 0x00, 0x24])
            .await
            .unwrap();
        host_write
            .write_all(&[0x5E, 0x09, 0x00, 0x00, 0x24])
            .await
            .unwrap();
        host_write
            .write_all(&[0x5E, 0x03, 0x00, 0x00, 0x24])
            .await
            .unwrap();
        assert_eq!(
            read_frame(&mut host_read).await,
            vec![0x5E, 0x03, 0x00, b'Y', 0x24]
        );

        host_write
            .write_all(&[0x5E, 0x02, 0x00, 0x01, 0x01, 0x02, 0x03, 0x04, 0x05, 0x24])
            .await
            .unwrap();
        assert_eq!(read_frame(&mut host_read).await, vec![0x5E, 0x02, 0x00, 0x24]);

        host_write
            .write_all(&[0x5E, 0x04, 0x07, 0x00, 0x24])
            .await
            .unwrap();
        assert_eq!(read_frame(&mut host_read).await, vec![0x5E, 0x04, 0x12, 0x24]);

        // block 2 holds a sentinel byte
        host_write
            .write_all(&[0x5E, 0x01, 0x00, 0x02, 0x24])
            .await
            .unwrap();
        assert_eq!(read_frame(&mut host_read).await, vec![0x5E, 0x01, 0x15, 0x24]);

        host_write.shutdown().await.unwrap();
    };

    let (stats, tag) = serve(FramerConfig::default(), tag, device, script).await;
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.framing_errors, 3);
    assert_eq!(stats.overflows, 1);
    assert_eq!(stats.noise, 2);
    assert_eq!(tag.block(1), Some(0x0403_0201));
}

#[tokio::test]
async fn checksum_and_frame_timeout() {
    let (host, device) = duplex(256);
    let (mut host_read, mut host_write) = split(host);
    let config = FramerConfig {
        checksum: true,
        frame_timeout: Some(Duration::from_millis(20)),
    };

    let script = async move {
        host_write.write_all(&[0x5E, 0x01, 0x00]).await.unwrap();
        sleep(Duration::from_millis(60)).await;
        host_write.write_all(&[0x03, 0xE2, 0x24]).await.unwrap();

        host_write
            .write_all(&[0x5E, 0x01, 0x00, 0x03, 0xE2, 0x24])
            .await
            .unwrap();
        assert_eq!(
            read_frame(&mut host_read).await,
            vec![0x5E, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x24]
        );

        host_write
            .write_all(&[0x5E, 0x01, 0x00, 0x03, 0xE3, 0x24])
            .await
            .unwrap();
        host_write
            .write_all(&[0x5E, 0x03, 0x00, 0x00, 0x00, 0x24])
            .await
            .unwrap();
        assert_eq!(
            read_frame(&mut host_read).await,
            vec![0x5E, 0x03, 0x00, b'Y', 0x47, 0x24]
        );

        host_write.shutdown().await.unwrap();
    };

    let (stats, _) = serve(config, SimTag::new(0, vec![0x04]), device, script).await;
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.checksum_errors, 1);
    assert_eq!(stats.framing_errors, 2);
}
