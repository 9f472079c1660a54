//! A live session with one IRC server.
//!
//! [`Connector::connect`] dials the server, spawns the reader, writer and
//! ping-responder tasks, registers with `NICK`/`USER` and only returns once
//! the server has sent `RPL_WELCOME`. After that the [`Connection`] is driven
//! through its dispatch table and outbound queue until the closed signal
//! fires.

use std::sync::Arc;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::commands::{self, CMD_PING, RPL_WELCOME};
use super::dispatch::{Delivery, DispatchTable};
use super::error::{ConnectError, DispatchError, SendError};
use super::message::{frame, Message, ParseError, MAX_LINE_LENGTH};
use super::signal::ClosedSignal;
use crate::config::ConnectionConfig;

/// Outbound queue size. Large enough that ordinary bursts never block a sender.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1000;
pub const DEFAULT_UNHANDLED_CAPACITY: usize = 1000;
pub const DEFAULT_ROUTE_CAPACITY: usize = 64;

/// Producer handle onto a connection's outbound queue.
///
/// Cheap to clone; every clone feeds the same single writer task, so lines
/// from one handle are sent in the order they were enqueued.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<String>,
    closed: ClosedSignal,
}

impl Outbound {
    pub async fn send(&self, message: &Message) -> Result<(), SendError> {
        self.send_raw(&message.to_wire()).await
    }

    /// Enqueue one line, without terminator. Waits while the queue is full.
    pub async fn send_raw(&self, line: &str) -> Result<(), SendError> {
        if line.contains(['\r', '\n']) {
            return Err(SendError::InvalidLine);
        }
        if self.closed.is_closed() {
            return Err(SendError::Closed);
        }
        self.tx
            .send(line.to_owned())
            .await
            .map_err(|_| SendError::Closed)
    }
}

/// Builder for a [`Connection`].
///
/// Routes claimed here exist before the first line is read, so they also
/// see traffic that arrives ahead of the welcome reply.
#[derive(Debug)]
pub struct Connector {
    dispatch: Arc<DispatchTable>,
    outbound_capacity: usize,
    unhandled_capacity: usize,
}

impl Connector {
    pub fn new() -> Self {
        Self::with_capacities(
            DEFAULT_OUTBOUND_CAPACITY,
            DEFAULT_UNHANDLED_CAPACITY,
            DEFAULT_ROUTE_CAPACITY,
        )
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::with_capacities(
            config.outbound_capacity,
            config.unhandled_capacity,
            config.route_capacity,
        )
    }

    fn with_capacities(outbound: usize, unhandled: usize, route: usize) -> Self {
        Self {
            dispatch: Arc::new(DispatchTable::new(route)),
            outbound_capacity: outbound.max(1),
            unhandled_capacity: unhandled.max(1),
        }
    }

    pub fn route(&self, command: &str) -> Result<mpsc::Receiver<Message>, DispatchError> {
        self.dispatch.route(command)
    }

    /// Dial `host:port` over TCP and register as `nick`.
    pub async fn connect(
        self,
        host: &str,
        port: u16,
        nick: &str,
    ) -> Result<Connection, ConnectError> {
        validate_nick(nick)?;
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ConnectError::Dial {
                addr: addr.clone(),
                source,
            })?;
        tracing::info!(%addr, "connected");
        self.connect_stream(stream, nick).await
    }

    /// Run the session over an already-established transport.
    pub async fn connect_stream<S>(self, stream: S, nick: &str) -> Result<Connection, ConnectError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        validate_nick(nick)?;

        let dispatch = self.dispatch;
        let pings = dispatch.route(CMD_PING)?;
        let mut welcome = dispatch.route_with_capacity(RPL_WELCOME, 1)?;

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
        let (unhandled_tx, unhandled_rx) = mpsc::channel(self.unhandled_capacity);
        let closed = ClosedSignal::new();
        let outbound = Outbound {
            tx: outbound_tx,
            closed: closed.clone(),
        };

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(read_loop(
            BufReader::new(reader),
            dispatch.clone(),
            unhandled_tx,
            closed.clone(),
        ));
        tokio::spawn(write_loop(
            BufWriter::new(writer),
            outbound_rx,
            closed.clone(),
        ));
        tokio::spawn(answer_pings(pings, outbound.clone(), closed.clone()));

        // Built before the handshake so an early return tears the tasks down.
        let conn = Connection {
            nick: nick.to_owned(),
            outbound,
            dispatch,
            unhandled: Some(unhandled_rx),
            closed,
        };

        for line in commands::registration(nick) {
            conn.outbound
                .send_raw(&line)
                .await
                .map_err(|_| ConnectError::ClosedBeforeWelcome)?;
        }

        tokio::select! {
            biased;
            reply = welcome.recv() => match reply {
                Some(reply) => tracing::debug!(reply = %reply, "welcome received"),
                None => return Err(ConnectError::ClosedBeforeWelcome),
            },
            _ = conn.closed.wait() => return Err(ConnectError::ClosedBeforeWelcome),
        }
        conn.dispatch.unroute(RPL_WELCOME);
        drop(welcome);

        tracing::info!(nick, "registered");
        Ok(conn)
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

/// Dial and register with default capacities.
pub async fn connect(host: &str, port: u16, nick: &str) -> Result<Connection, ConnectError> {
    Connector::new().connect(host, port, nick).await
}

fn validate_nick(nick: &str) -> Result<(), ConnectError> {
    let bad = nick.is_empty()
        || nick.starts_with(':')
        || nick.contains([' ', '\r', '\n', '\0']);
    if bad {
        return Err(ConnectError::InvalidNick(nick.to_owned()));
    }
    Ok(())
}

/// A registered session with one server.
///
/// Dropping the connection fires the closed signal, which stops the
/// background tasks and releases the transport once the writer has flushed
/// whatever was already queued.
#[derive(Debug)]
pub struct Connection {
    nick: String,
    outbound: Outbound,
    dispatch: Arc<DispatchTable>,
    unhandled: Option<mpsc::Receiver<Message>>,
    closed: ClosedSignal,
}

impl Connection {
    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    pub async fn send(&self, message: &Message) -> Result<(), SendError> {
        self.outbound.send(message).await
    }

    pub async fn send_raw(&self, line: &str) -> Result<(), SendError> {
        self.outbound.send_raw(line).await
    }

    /// Enqueue `QUIT`. Lines queued before the connection is closed or
    /// dropped are still flushed by the writer.
    pub async fn quit(&self, reason: Option<&str>) -> Result<(), SendError> {
        self.outbound.send(&commands::quit(reason)).await
    }

    /// Claim the consumer channel for `command`.
    pub fn route(&self, command: &str) -> Result<mpsc::Receiver<Message>, DispatchError> {
        self.dispatch.route(command)
    }

    /// Give up a route. The built-in `PING` route is permanent.
    pub fn unroute(&self, command: &str) -> bool {
        if commands::normalize(command) == CMD_PING {
            return false;
        }
        self.dispatch.unroute(command)
    }

    /// The catch-all sequence. Can be taken once.
    pub fn take_unhandled(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.unhandled.take()
    }

    pub fn closed_signal(&self) -> ClosedSignal {
        self.closed.clone()
    }

    pub async fn closed(&self) {
        self.closed.wait().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    pub fn close(&self) {
        if self.closed.fire() {
            tracing::info!(nick = %self.nick, "connection closed by owner");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.fire();
    }
}

async fn read_loop<R>(
    mut reader: BufReader<R>,
    dispatch: Arc<DispatchTable>,
    unhandled: mpsc::Sender<Message>,
    closed: ClosedSignal,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(512);
    // Set while skipping the rest of an overlong line.
    let mut discarding = false;
    loop {
        buf.clear();
        let mut line_reader = (&mut reader).take(MAX_LINE_LENGTH as u64);
        let read = tokio::select! {
            _ = closed.wait() => break,
            read = line_reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => {
                tracing::info!("server closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "read error");
                break;
            }
        }

        let terminated = buf.ends_with(b"\n");
        if discarding {
            discarding = !terminated;
            continue;
        }
        if !terminated && buf.len() == MAX_LINE_LENGTH {
            tracing::warn!(error = %ParseError::TooLong, "dropping overlong line");
            discarding = true;
            continue;
        }

        let line = String::from_utf8_lossy(&buf);
        tracing::debug!(line = %line.trim_end(), "recv");

        let message = match Message::parse(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, line = %line.trim_end(), "dropping malformed line");
                continue;
            }
        };

        let delivery = tokio::select! {
            _ = closed.wait() => break,
            delivery = dispatch.dispatch(message, &unhandled) => delivery,
        };
        if delivery == Delivery::Dropped {
            tracing::trace!("no unhandled consumer, message discarded");
        }
    }

    if closed.fire() {
        tracing::info!("connection closed by reader");
    }
}

async fn write_loop<W>(
    mut writer: BufWriter<W>,
    mut queue: mpsc::Receiver<String>,
    closed: ClosedSignal,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        // Lines already queued when the signal fires are still written.
        let line = tokio::select! {
            biased;
            line = queue.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = closed.wait() => break,
        };

        if let Err(e) = write_line(&mut writer, &line).await {
            tracing::warn!(error = %e, "write error");
            break;
        }
        tracing::debug!(line = %line, "sent");
    }

    if closed.fire() {
        tracing::info!("connection closed by writer");
    }
}

async fn write_line<W>(writer: &mut BufWriter<W>, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame(line).as_bytes()).await?;
    writer.flush().await
}

/// Answers every `PING <token>` with `PONG <token>` so route consumers never
/// have to deal with keep-alives.
async fn answer_pings(
    mut pings: mpsc::Receiver<Message>,
    outbound: Outbound,
    closed: ClosedSignal,
) {
    loop {
        let ping = tokio::select! {
            _ = closed.wait() => break,
            ping = pings.recv() => match ping {
                Some(ping) => ping,
                None => break,
            },
        };

        let Some(token) = ping.param(0) else {
            tracing::warn!("PING without a token, not answering");
            continue;
        };
        if outbound.send(&commands::pong(token)).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{DuplexStream, ReadBuf, ReadHalf, WriteHalf};
    use tokio::net::TcpListener;

    async fn within<F: Future>(fut: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("timed out")
    }

    /// Scripted server end of an in-memory transport.
    struct FakeServer {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        fn pair() -> (DuplexStream, FakeServer) {
            let (client, server) = tokio::io::duplex(8192);
            let (reader, writer) = tokio::io::split(server);
            let server = FakeServer {
                reader: BufReader::new(reader),
                writer,
            };
            (client, server)
        }

        async fn line(&mut self) -> String {
            let mut line = String::new();
            within(self.reader.read_line(&mut line)).await.unwrap();
            line
        }

        async fn send(&mut self, text: &str) {
            self.writer.write_all(text.as_bytes()).await.unwrap();
        }

        async fn expect_registration(&mut self, nick: &str) {
            assert_eq!(self.line().await, format!("NICK {nick}\r\n"));
            assert_eq!(self.line().await, format!("USER {nick} 0 * :{nick}\r\n"));
        }
    }

    /// Transport whose writes start failing after `writes_left` succeed.
    struct FailAfter {
        inner: DuplexStream,
        writes_left: usize,
    }

    impl AsyncRead for FailAfter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for FailAfter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.writes_left == 0 {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            let written = Pin::new(&mut self.inner).poll_write(cx, buf);
            if let Poll::Ready(Ok(_)) = written {
                self.writes_left -= 1;
            }
            written
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    async fn connected() -> (Connection, FakeServer) {
        let (client, mut server) = FakeServer::pair();
        let connecting =
            tokio::spawn(async move { Connector::new().connect_stream(client, "alice").await });
        server.expect_registration("alice").await;
        server.send(":irc.example.net 001 alice :Welcome\r\n").await;
        let conn = within(connecting).await.unwrap().unwrap();
        (conn, server)
    }

    #[tokio::test]
    async fn test_connect_waits_for_welcome() {
        let (client, mut server) = FakeServer::pair();
        let connecting =
            tokio::spawn(async move { Connector::new().connect_stream(client, "alice").await });

        server.expect_registration("alice").await;
        server.send(":irc.example.net NOTICE * :*** Checking ident\r\n").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!connecting.is_finished());

        server.send(":irc.example.net 001 alice :Welcome\r\n").await;
        let mut conn = within(connecting).await.unwrap().unwrap();
        assert_eq!(conn.nick(), "alice");
        assert!(!conn.is_closed());

        // Pre-welcome traffic is kept for the unhandled consumer.
        let mut unhandled = conn.take_unhandled().unwrap();
        let notice = within(unhandled.recv()).await.unwrap();
        assert_eq!(notice.command, "NOTICE");
        assert!(conn.take_unhandled().is_none());
    }

    #[tokio::test]
    async fn test_later_welcome_is_unhandled() {
        let (mut conn, mut server) = connected().await;
        let mut unhandled = conn.take_unhandled().unwrap();

        server.send(":irc.example.net 001 alice :Welcome again\r\n").await;
        let again = within(unhandled.recv()).await.unwrap();
        assert_eq!(again.command, "001");
        assert_eq!(again.param(1), Some("Welcome again"));
    }

    #[tokio::test]
    async fn test_ping_is_answered_and_not_unhandled() {
        let (mut conn, mut server) = connected().await;
        let mut unhandled = conn.take_unhandled().unwrap();

        server.send("PING :abc123\r\n").await;
        assert_eq!(server.line().await, "PONG abc123\r\n");

        server.send(":bob!b@h PRIVMSG alice :hi\r\n").await;
        let next = within(unhandled.recv()).await.unwrap();
        assert_eq!(next.command, "PRIVMSG");
        assert!(unhandled.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_route_is_permanent() {
        let (conn, _server) = connected().await;
        assert!(!conn.unroute("PING"));
        assert!(!conn.unroute("ping"));
        assert!(conn.route("PING").is_err());
    }

    #[tokio::test]
    async fn test_pre_registered_route_sees_early_traffic() {
        let (client, mut server) = FakeServer::pair();
        let connector = Connector::new();
        let mut notices = connector.route("NOTICE").unwrap();
        let connecting = tokio::spawn(async move { connector.connect_stream(client, "alice").await });

        server.expect_registration("alice").await;
        server.send(":srv NOTICE * :*** Found your hostname\r\n").await;
        server.send(":srv 001 alice :Welcome\r\n").await;
        let _conn = within(connecting).await.unwrap().unwrap();

        let notice = within(notices.recv()).await.unwrap();
        assert_eq!(notice.param(1), Some("*** Found your hostname"));
    }

    #[tokio::test]
    async fn test_route_after_connect() {
        let (conn, mut server) = connected().await;
        let mut privmsgs = conn.route("PRIVMSG").unwrap();

        server.send(":bob!b@h PRIVMSG #rust :one\r\n").await;
        server.send(":bob!b@h PRIVMSG #rust :two\r\n").await;
        assert_eq!(within(privmsgs.recv()).await.unwrap().param(1), Some("one"));
        assert_eq!(within(privmsgs.recv()).await.unwrap().param(1), Some("two"));
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let (mut conn, mut server) = connected().await;
        let mut unhandled = conn.take_unhandled().unwrap();

        server.send(":irc.example.net\r\n").await;
        server.send("\r\n").await;
        server.send(":bob!b@h PRIVMSG alice :still here\r\n").await;

        let next = within(unhandled.recv()).await.unwrap();
        assert_eq!(next.param(1), Some("still here"));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_outbound_lines_are_framed_in_order() {
        let (conn, mut server) = connected().await;
        let outbound = conn.outbound();

        outbound.send_raw("JOIN #rust").await.unwrap();
        conn.send(&Message::new("PRIVMSG", ["#rust", "hello there"]))
            .await
            .unwrap();
        conn.quit(Some("bye")).await.unwrap();

        assert_eq!(server.line().await, "JOIN #rust\r\n");
        assert_eq!(server.line().await, "PRIVMSG #rust :hello there\r\n");
        assert_eq!(server.line().await, "QUIT :bye\r\n");
    }

    #[tokio::test]
    async fn test_line_breaks_are_rejected() {
        let (conn, _server) = connected().await;
        assert_eq!(
            conn.send_raw("PRIVMSG #a :x\r\nQUIT").await,
            Err(SendError::InvalidLine)
        );
    }

    #[tokio::test]
    async fn test_closed_before_welcome() {
        let (client, mut server) = FakeServer::pair();
        let connecting =
            tokio::spawn(async move { Connector::new().connect_stream(client, "alice").await });

        server.expect_registration("alice").await;
        server.send(":srv ERROR :Closing link\r\n").await;
        drop(server);

        let err = within(connecting).await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectError::ClosedBeforeWelcome));
    }

    #[tokio::test]
    async fn test_read_failure_closes_once_without_deadlock() {
        let (conn, server) = connected().await;
        let signal = conn.closed_signal();
        drop(server);

        within(conn.closed()).await;
        assert!(conn.is_closed());
        // Already fired by the reader.
        assert!(!signal.fire());
        assert_eq!(conn.send_raw("PRIVMSG #a :late").await, Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_write_failure_closes_once_without_deadlock() {
        let (client, mut server) = FakeServer::pair();
        let client = FailAfter {
            inner: client,
            writes_left: 2,
        };
        let connecting =
            tokio::spawn(async move { Connector::new().connect_stream(client, "alice").await });
        server.expect_registration("alice").await;
        server.send(":irc.example.net 001 alice :Welcome\r\n").await;
        let mut conn = within(connecting).await.unwrap().unwrap();
        let mut unhandled = conn.take_unhandled().unwrap();
        let signal = conn.closed_signal();

        // The PONG is the third write, which fails.
        server.send("PING :x\r\n").await;
        within(conn.closed()).await;
        assert!(!signal.fire());

        // The reader stopped too: the unhandled sequence ends.
        assert!(within(unhandled.recv()).await.is_none());
        assert_eq!(conn.send_raw("PRIVMSG #a :late").await, Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped() {
        let (mut conn, mut server) = connected().await;
        let mut unhandled = conn.take_unhandled().unwrap();

        let flood = format!(":bob!b@h PRIVMSG alice :{}\r\n", "a".repeat(3 * MAX_LINE_LENGTH));
        server.send(&flood).await;
        server.send(":bob!b@h PRIVMSG alice :short\r\n").await;

        let next = within(unhandled.recv()).await.unwrap();
        assert_eq!(next.param(1), Some("short"));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_queued_quit_survives_drop() {
        let (conn, mut server) = connected().await;
        conn.quit(Some("bye")).await.unwrap();
        drop(conn);

        assert_eq!(server.line().await, "QUIT :bye\r\n");
    }

    #[tokio::test]
    async fn test_close_stops_the_session() {
        let (conn, mut server) = connected().await;
        conn.close();
        within(conn.closed()).await;

        // Both halves are released, so the server sees end of stream.
        let mut rest = Vec::new();
        within(server.reader.read_to_end(&mut rest)).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_nick() {
        let (client, _server) = FakeServer::pair();
        let err = Connector::new()
            .connect_stream(client, "bad nick")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::InvalidNick(_)));
    }

    #[tokio::test]
    async fn test_connect_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            for _ in 0..2 {
                line.clear();
                reader.read_line(&mut line).await.unwrap();
            }
            writer
                .write_all(b":irc.example.net 001 bob :Welcome\r\nPING :tcp-token\r\n")
                .await
                .unwrap();
            line.clear();
            reader.read_line(&mut line).await.unwrap();
            line
        });

        let conn = within(connect("127.0.0.1", port, "bob")).await.unwrap();
        assert_eq!(within(server).await.unwrap(), "PONG tcp-token\r\n");
        drop(conn);
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1", port, "bob").await.unwrap_err();
        assert!(matches!(err, ConnectError::Dial { .. }));
    }
}
