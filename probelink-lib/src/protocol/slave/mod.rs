mod session;

use async_trait::async_trait;
use log::warn;

use super::{HandlerError, Request, Response};

pub use session::{byte_queue, pump, Session, QUEUE_DEPTH};

/// Handlers for every operation a device answers. A request for an
/// operation always reaches exactly one of these methods via [`dispatch`].
#[async_trait]
pub trait Device: Send {
    async fn read(&mut self, target: u8, index: u8) -> Result<u32, HandlerError>;
    async fn write(&mut self, target: u8, index: u8, payload: &[u8]) -> Result<(), HandlerError>;
    async fn check_presence(&mut self, target: u8, index: u8) -> Result<bool, HandlerError>;
    async fn read_uid(&mut self, target: u8, index: u8) -> Result<Vec<u8>, HandlerError>;
}

/// Runs the handler for `request`. Handler failures become
/// [`Response::Failure`] so the host always gets an answer.
pub async fn dispatch<D: Device + ?Sized>(device: &mut D, request: Request) -> Response {
    let result = match request {
        Request::Read { target, index } => device
            .read(target, index)
            .await
            .map(|value| Response::Value(value.to_le_bytes())),
        Request::Write {
            target,
            index,
            payload,
        } => device
            .write(target, index, payload.as_slice())
            .await
            .map(|_| Response::Ack),
        Request::CheckPresence { target, index } => device
            .check_presence(target, index)
            .await
            .map(Response::Presence),
        Request::ReadUid { target, index } => {
            device.read_uid(target, index).await.map(Response::Uid)
        }
    };

    result.unwrap_or_else(|e| {
        warn!("{} failed: {}", request, e);
        Response::Failure(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Opcode, Payload, ResponseDecoder, ResponseFrame};
    use crate::sim::SimTag;

    #[tokio::test]
    async fn dispatch_reaches_matching_handler() {
        let mut tag = SimTag::new(1, vec![0x04, 0x11, 0x22]);

        let write = Request::Write {
            target: 1,
            index: 5,
            payload: Payload::from_slice(&[0x78, 0x56, 0x34, 0x12]).unwrap(),
        };
        assert_eq!(dispatch(&mut tag, write).await, Response::Ack);
        assert_eq!(tag.block(5), Some(0x1234_5678));

        let read = Request::Read {
            target: 1,
            index: 5,
        };
        assert_eq!(
            dispatch(&mut tag, read).await,
            Response::Value([0x78, 0x56, 0x34, 0x12])
        );

        let present = Request::CheckPresence {
            target: 1,
            index: 0,
        };
        assert_eq!(dispatch(&mut tag, present).await, Response::Presence(true));

        let uid = Request::ReadUid {
            target: 1,
            index: 0,
        };
        assert_eq!(
            dispatch(&mut tag, uid).await,
            Response::Uid(vec![0x04, 0x11, 0x22])
        );
    }

    #[tokio::test]
    async fn handler_errors_become_failures() {
        let mut tag = SimTag::new(1, vec![0x04]);

        let wrong_target = Request::Read {
            target: 2,
            index: 0,
        };
        assert_eq!(
            dispatch(&mut tag, wrong_target).await,
            Response::Failure(HandlerError::InvalidAddress)
        );

        let empty_write = Request::Write {
            target: 1,
            index: 0,
            payload: Payload::default(),
        };
        assert_eq!(
            dispatch(&mut tag, empty_write).await,
            Response::Failure(HandlerError::BadPayload)
        );

        tag.set_present(false);
        let uid = Request::ReadUid {
            target: 1,
            index: 0,
        };
        assert_eq!(
            dispatch(&mut tag, uid).await,
            Response::Failure(HandlerError::NotPresent)
        );
        let present = Request::CheckPresence {
            target: 1,
            index: 0,
        };
        assert_eq!(dispatch(&mut tag, present).await, Response::Presence(false));
    }

    struct Broken;

    #[async_trait]
    impl Device for Broken {
        async fn read(&mut self, _: u8, _: u8) -> Result<u32, HandlerError> {
            Err(HandlerError::Other(0))
        }
        async fn write(&mut self, _: u8, _: u8, _: &[u8]) -> Result<(), HandlerError> {
            Err(HandlerError::Other(0))
        }
        async fn check_presence(&mut self, _: u8, _: u8) -> Result<bool, HandlerError> {
            Err(HandlerError::Other(0))
        }
        async fn read_uid(&mut self, _: u8, _: u8) -> Result<Vec<u8>, HandlerError> {
            Err(HandlerError::Other(0))
        }
    }

    #[tokio::test]
    async fn failed_write_never_reads_as_ack() {
        let write = Request::Write {
            target: 0,
            index: 0,
            payload: Payload::from_slice(&[0x01]).unwrap(),
        };
        let response = dispatch(&mut Broken, write).await;
        assert_eq!(response, Response::Failure(HandlerError::Other(0)));

        let bytes = ResponseFrame::new(Opcode::Write, response)
            .encode(false)
            .unwrap();
        assert_eq!(bytes, vec![0x5E, 0x02, 0x14, 0x24]);

        let mut decoder = ResponseDecoder::new(false);
        let decoded: Vec<_> = bytes.iter().filter_map(|&b| decoder.push(b)).collect();
        assert_eq!(
            decoded,
            vec![Ok(ResponseFrame::new(
                Opcode::Write,
                Response::Failure(HandlerError::DeviceFault)
            ))]
        );
    }
}
