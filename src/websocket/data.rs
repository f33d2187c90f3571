//! Second-phase filter: frames to logical messages.

use std::fmt;
use std::sync::Arc;

use crate::buffer::BufferSequence;
use crate::pipeline::{FilterError, PartMachine, PipelineFilter, SequenceReader};
use crate::websocket::error::WebSocketError;
use crate::websocket::filter::WebSocketContext;
use crate::websocket::frame::FramePart;
use crate::websocket::opcode::{CloseCode, OpCode};
use crate::websocket::package::{WebSocketPackage, FIN};

/// First frame of a fragmented message plus the payload gathered so far.
struct PendingMessage {
    first: WebSocketPackage,
    data: BufferSequence,
    frames: usize,
    /// Wire bytes of the frames folded in so far, headers included.
    wire: usize,
}

/// Decodes frames with a [`PartMachine`] and reassembles fragmented
/// messages. Control frames pass through immediately, even between the
/// fragments of a message.
///
/// Small fragments are copied into the tail block of the message being
/// assembled, so a stream of tiny frames holds about as many pool blocks
/// as its payload needs.
pub struct DataFilter {
    context: Arc<WebSocketContext>,
    frames: PartMachine<FramePart>,
    pending: Option<PendingMessage>,
    /// Bytes consumed by the frame currently in the part machine.
    frame_wire: usize,
}

impl DataFilter {
    pub fn new(context: Arc<WebSocketContext>) -> Self {
        Self {
            context,
            frames: PartMachine::new(),
            pending: None,
            frame_wire: 0,
        }
    }

    pub fn context(&self) -> &Arc<WebSocketContext> {
        &self.context
    }

    /// Wire bytes of the fragmented message in progress.
    pub fn retained(&self) -> usize {
        self.pending.as_ref().map_or(0, |pending| pending.wire)
    }

    /// Fold one complete frame of `wire` bytes into the message state,
    /// returning a package when the frame completes something deliverable.
    fn assemble(
        &mut self,
        mut frame: WebSocketPackage,
        wire: usize,
    ) -> Result<Option<WebSocketPackage>, WebSocketError> {
        if frame.op_code.is_control() {
            if frame.op_code == OpCode::Close {
                validate_close(&frame)?;
            }
            return Ok(Some(frame));
        }

        let data = frame.data.take().unwrap_or_default();
        match (frame.op_code, self.pending.is_some()) {
            (OpCode::Continuation, false) => Err(WebSocketError::UnexpectedContinuation),
            (OpCode::Continuation, true) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.data.append_compact(&self.context.pool, data);
                    pending.frames += 1;
                    pending.wire += wire;
                }
                if !frame.fin() {
                    return Ok(None);
                }
                let Some(PendingMessage { first, data, .. }) = self.pending.take() else {
                    return Ok(None);
                };
                finish_message(first, data, &frame).map(Some)
            }
            (op_code, true) => Err(WebSocketError::MessageInProgress(op_code)),
            (_, false) if frame.fin() => {
                let last = WebSocketPackage {
                    mask_key: frame.mask_key,
                    has_mask: frame.has_mask,
                    ..WebSocketPackage::frame(None)
                };
                finish_message(frame, data, &last).map(Some)
            }
            (_, false) => {
                self.pending = Some(PendingMessage {
                    first: frame,
                    data,
                    frames: 1,
                    wire,
                });
                Ok(None)
            }
        }
    }
}

/// Build the delivered package from the first frame's header and the whole
/// payload. `last` supplies the final frame's mask details.
fn finish_message(
    first: WebSocketPackage,
    data: BufferSequence,
    last: &WebSocketPackage,
) -> Result<WebSocketPackage, WebSocketError> {
    let mut package = WebSocketPackage {
        flags: FIN,
        has_mask: last.has_mask,
        mask_key: last.mask_key,
        payload_length: data.len() as u64,
        ..first
    };

    if package.op_code == OpCode::Text {
        let message =
            String::from_utf8(data.to_vec()).map_err(|_| WebSocketError::InvalidUtf8)?;
        package.message = Some(message);
        package.data = None;
    } else {
        package.data = Some(data);
    }
    Ok(package)
}

fn validate_close(frame: &WebSocketPackage) -> Result<(), WebSocketError> {
    let len = frame.data.as_ref().map_or(0, BufferSequence::len);
    match len {
        0 => Ok(()),
        1 => Err(WebSocketError::InvalidClosePayload),
        _ => {
            let Some((code, _)) = frame.close_status() else {
                return Err(WebSocketError::InvalidClosePayload);
            };
            if !CloseCode::is_valid(code) {
                return Err(WebSocketError::InvalidCloseCode(code));
            }
            let payload = frame.payload();
            if std::str::from_utf8(&payload[2..]).is_err() {
                return Err(WebSocketError::InvalidUtf8);
            }
            Ok(())
        }
    }
}

impl PipelineFilter for DataFilter {
    type Package = WebSocketPackage;

    fn filter(
        &mut self,
        reader: &mut SequenceReader<'_>,
    ) -> Result<Option<WebSocketPackage>, FilterError> {
        loop {
            let start = reader.consumed();
            let frame = self.frames.run(self.context.as_ref(), reader)?;
            self.frame_wire += reader.consumed() - start;
            let Some(frame) = frame else {
                return Ok(None);
            };
            self.frames.reset();

            let wire = std::mem::take(&mut self.frame_wire);
            if let Some(package) = self.assemble(frame, wire)? {
                return Ok(Some(package));
            }
        }
    }

    /// Clears the frame position only; a half-received fragmented message
    /// survives until its final frame arrives.
    fn reset(&mut self) {
        self.frames.reset();
        self.frame_wire = 0;
    }

    fn retained(&self) -> usize {
        DataFilter::retained(self)
    }
}

impl fmt::Debug for DataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFilter")
            .field("role", &self.context.role)
            .field("part", self.frames.current())
            .field("pending_frames", &self.pending.as_ref().map(|p| p.frames))
            .finish()
    }
}
