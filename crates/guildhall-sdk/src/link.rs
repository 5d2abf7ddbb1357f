// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bot side of the supervisor IPC channel.
//!
//! stdout carries protocol lines only. Bots must log to stderr, which the
//! supervisor forwards into its own log stream.

use guildhall_protocol::{ChildMessage, LineReader, LineWriter, SupervisorMessage};
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tracing::{debug, info};

use crate::error::Result;

/// Connection to the supervising process.
pub struct SupervisorLink<R, W> {
    receiver: LinkReceiver<R>,
    sender: LinkSender<W>,
}

impl SupervisorLink<Stdin, Stdout> {
    /// Link over the process's own stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> SupervisorLink<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Link over arbitrary streams.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            receiver: LinkReceiver {
                inner: LineReader::new(reader),
            },
            sender: LinkSender {
                inner: LineWriter::new(writer),
            },
        }
    }

    /// Report that the bot is connected and serving `guilds` guilds.
    pub async fn ready(&mut self, guilds: u64) -> Result<()> {
        self.sender.ready(guilds).await
    }

    /// Surface an error without exiting.
    pub async fn error(&mut self, message: impl Into<String>) -> Result<()> {
        self.sender.error(message).await
    }

    /// Wait until the supervisor asks for shutdown or goes away.
    pub async fn wait_for_shutdown(&mut self) -> Result<()> {
        self.receiver.wait_for_shutdown().await
    }

    /// Separate halves so sending and waiting can happen in different tasks.
    pub fn split(self) -> (LinkReceiver<R>, LinkSender<W>) {
        (self.receiver, self.sender)
    }
}

/// Incoming half of a [`SupervisorLink`].
pub struct LinkReceiver<R> {
    inner: LineReader<R>,
}

impl<R: AsyncRead + Unpin> LinkReceiver<R> {
    /// Next supervisor message, or `None` once the supervisor closed the pipe.
    pub async fn next_message(&mut self) -> Result<Option<SupervisorMessage>> {
        Ok(self.inner.next().await?)
    }

    /// Wait until the supervisor asks for shutdown.
    ///
    /// End of stream counts as a shutdown request: a closed stdin means the
    /// supervisor is gone and nothing will read this bot's reports.
    pub async fn wait_for_shutdown(&mut self) -> Result<()> {
        match self.next_message().await? {
            Some(SupervisorMessage::Shutdown) => info!("Shutdown requested by supervisor"),
            None => info!("Supervisor closed the control channel"),
        }
        Ok(())
    }
}

/// Outgoing half of a [`SupervisorLink`].
pub struct LinkSender<W> {
    inner: LineWriter<W>,
}

impl<W: AsyncWrite + Unpin> LinkSender<W> {
    /// Report that the bot is connected and serving `guilds` guilds.
    pub async fn ready(&mut self, guilds: u64) -> Result<()> {
        debug!(guilds, "Reporting ready");
        self.send(ChildMessage::Ready { guilds }).await
    }

    /// Surface an error without exiting.
    pub async fn error(&mut self, message: impl Into<String>) -> Result<()> {
        self.send(ChildMessage::Error {
            message: message.into(),
        })
        .await
    }

    async fn send(&mut self, msg: ChildMessage) -> Result<()> {
        self.inner.send(&msg).await?;
        Ok(())
    }
}
