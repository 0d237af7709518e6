//! axum WebSocket transport
//!
//! Frame conversions and the [`FrameSink`]/[`FrameStream`] impls for the two
//! halves of a split axum [`WebSocket`].

use async_trait::async_trait;
use axum::extract::ws::{self, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use crate::broker::{CloseFrame, Frame, FrameSink, FrameStream, TransportError};

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(close) => Frame::Close(close.map(|c| CloseFrame {
                code: c.code,
                reason: c.reason.into_owned(),
            })),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close(close) => Message::Close(close.map(|c| ws::CloseFrame {
                code: c.code,
                reason: c.reason.into(),
            })),
        }
    }
}

impl From<axum::Error> for TransportError {
    fn from(err: axum::Error) -> Self {
        TransportError::WebSocket(err.to_string())
    }
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        SinkExt::send(self, Message::from(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self).await?;
        Ok(())
    }
}

#[async_trait]
impl FrameStream for SplitStream<WebSocket> {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        let message = self.next().await?;
        Some(message.map(Frame::from).map_err(TransportError::from))
    }
}
