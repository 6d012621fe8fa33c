//! Session tests against a scripted pydevd peer on a loopback socket
//!
//! Each test plays the debuggee side of the line protocol by hand, so the
//! wire format the session produces is checked byte for byte.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

use pydbg::pydevd::RemoteDebugger;
use pydbg::session::{
    BreakpointKinds, BreakpointOptions, ContentType, DebugHost, DebuggerSession, HitBreakpoint,
    LocalPosition, PositionConverter, SessionOptions, SessionState, SuspendContext,
};
use pydbg::Error;

const WAIT: Duration = Duration::from_secs(5);

/// The debuggee end of the connection
struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("session never connected")
            .unwrap();
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Next message as (command, seq, raw payload)
    async fn recv(&mut self) -> (u32, u64, String) {
        let mut line = String::new();
        tokio::time::timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("no message from session")
            .unwrap();
        let line = line.trim_end_matches('\n');
        let mut parts = line.splitn(3, '\t');
        let command = parts.next().unwrap().parse().unwrap();
        let seq = parts.next().unwrap().parse().unwrap();
        (command, seq, parts.next().unwrap_or("").to_string())
    }

    async fn send(&mut self, command: u32, seq: u64, payload: &str) {
        let line = format!("{}\t{}\t{}\n", command, seq, payload);
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Answer the version request and swallow configuration up to `run`
    async fn handshake(&mut self) -> Vec<(u32, u64, String)> {
        let (command, seq, payload) = self.recv().await;
        assert_eq!(command, 501);
        assert!(payload.starts_with("1.1\t"));
        self.send(501, seq, "PY-2.1.0").await;

        let mut configuration = Vec::new();
        loop {
            let message = self.recv().await;
            if message.0 == 101 {
                configuration.push(message);
                return configuration;
            }
            configuration.push(message);
        }
    }
}

#[derive(Default)]
struct TestHost {
    events: Mutex<Vec<String>>,
}

impl TestHost {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl DebugHost for TestHost {
    fn breakpoint_reached(
        &self,
        breakpoint: &HitBreakpoint,
        _message: Option<&str>,
        context: &SuspendContext,
    ) -> bool {
        self.events
            .lock()
            .push(format!("breakpoint {} {}", breakpoint, context.thread_id()));
        true
    }

    fn position_reached(&self, context: &SuspendContext) {
        self.events
            .lock()
            .push(format!("position {}", context.thread_id()));
    }

    fn print(&self, text: &str, content_type: ContentType) {
        self.events
            .lock()
            .push(format!("print {:?} {}", content_type, text));
    }

    fn session_stopped(&self) {
        self.events.lock().push("stopped".to_string());
    }
}

async fn setup() -> (TcpListener, Arc<DebuggerSession>, Arc<TestHost>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let transport = RemoteDebugger::connect_to(addr.to_string(), WAIT);
    let host = Arc::new(TestHost::default());
    let session = Arc::new(DebuggerSession::new(
        Arc::new(transport),
        host.clone(),
        PositionConverter::new(),
        BreakpointKinds::default(),
        SessionOptions {
            connect_timeout: WAIT,
            ..Default::default()
        },
    ));
    (listener, session, host)
}

async fn wait_for_state(session: &DebuggerSession, wanted: SessionState) {
    let mut state = session.subscribe_state();
    tokio::time::timeout(WAIT, async {
        while *state.borrow_and_update() != wanted {
            state.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {}", wanted));
}

const SUSPEND_AT_BREAKPOINT: &str = "<xml><thread id=\"t1\" name=\"MainThread\" stop_reason=\"111\">\
<frame id=\"f1\" name=\"main\" file=\"/nonexistent/app.py\" line=\"10\"/>\
<frame id=\"f2\" name=\"&lt;module&gt;\" file=\"/nonexistent/app.py\" line=\"20\"/>\
</thread></xml>";

#[tokio::test]
async fn test_breakpoints_replayed_before_run() {
    let (listener, session, host) = setup().await;
    session.add_line_breakpoint(
        &LocalPosition::new("/nonexistent/app.py", 9),
        BreakpointOptions {
            condition: Some("x > 1".to_string()),
            ..Default::default()
        },
    );
    let _task = session.start();

    let mut peer = Peer::accept(&listener).await;
    let configuration = peer.handshake().await;

    assert_eq!(
        configuration,
        vec![
            (112, 3, "python-line\t/nonexistent/app.py\t10".to_string()),
            (
                111,
                5,
                "python-line\t/nonexistent/app.py\t10\tNone\tTHREAD\tx > 1\tNone".to_string()
            ),
            (101, 7, String::new()),
        ]
    );
    wait_for_state(&session, SessionState::Running).await;
    assert!(host.events()[0].contains("build 2.1.0"));
}

#[tokio::test]
async fn test_suspend_step_and_evaluate() {
    let (listener, session, host) = setup().await;
    session.add_line_breakpoint(
        &LocalPosition::new("/nonexistent/app.py", 9),
        BreakpointOptions::default(),
    );
    let _task = session.start();
    let mut peer = Peer::accept(&listener).await;
    peer.handshake().await;

    peer.send(105, 0, SUSPEND_AT_BREAKPOINT).await;
    wait_for_state(&session, SessionState::Suspended).await;
    assert!(host
        .events()
        .contains(&"breakpoint python-line at /nonexistent/app.py:10 t1".to_string()));
    assert_eq!(session.current_frame().unwrap().frame_id, "f1");

    let (value, _) = tokio::join!(session.evaluate("x*2", false, true), async {
        let (command, seq, payload) = peer.recv().await;
        assert_eq!(command, 113);
        assert_eq!(payload, "t1\tf1\tFRAME\tx%2A2\t1");
        peer.send(113, seq, "<xml><var name=\"x*2\" type=\"int\" value=\"int: 84\"/></xml>")
            .await;
    });
    let value = value.unwrap();
    assert_eq!(value.value, "84");
    assert_eq!(value.type_name, "int");

    session.step_over();
    let (command, _, payload) = peer.recv().await;
    assert_eq!((command, payload.as_str()), (108, "t1"));

    peer.send(106, 0, "t1\t108").await;
    wait_for_state(&session, SessionState::Running).await;
    assert!(matches!(session.current_frame(), Err(Error::NoCurrentFrame)));
}

#[tokio::test]
async fn test_remote_error_surfaces_on_evaluate() {
    let (listener, session, _host) = setup().await;
    let _task = session.start();
    let mut peer = Peer::accept(&listener).await;
    peer.handshake().await;
    peer.send(105, 0, SUSPEND_AT_BREAKPOINT).await;
    wait_for_state(&session, SessionState::Suspended).await;

    let (value, _) = tokio::join!(session.evaluate("boom", false, true), async {
        let (_, seq, _) = peer.recv().await;
        peer.send(901, seq, "NameError").await;
    });
    assert!(matches!(value, Err(Error::RemoteError { .. })));
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_console_output_forwarded() {
    let (listener, session, host) = setup().await;
    let _task = session.start();
    let mut peer = Peer::accept(&listener).await;
    peer.handshake().await;

    peer.send(116, 0, "<xml><io s=\"oops\" ctx=\"2\"/></xml>").await;
    peer.send(105, 0, SUSPEND_AT_BREAKPOINT).await;
    wait_for_state(&session, SessionState::Suspended).await;

    assert!(host
        .events()
        .contains(&"print ErrorOutput oops".to_string()));
}

#[tokio::test]
async fn test_peer_hangup_closes_session() {
    let (listener, session, host) = setup().await;
    let task = session.start();
    let mut peer = Peer::accept(&listener).await;
    peer.handshake().await;
    wait_for_state(&session, SessionState::Running).await;

    drop(peer);
    wait_for_state(&session, SessionState::Closed).await;

    assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap().is_ok());
    assert_eq!(host.events().last(), Some(&"stopped".to_string()));
    assert!(session
        .add_line_breakpoint(&LocalPosition::new("a.py", 1), BreakpointOptions::default())
        .is_none());
}

#[tokio::test]
async fn test_connect_timeout_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let host = Arc::new(TestHost::default());
    let session = Arc::new(DebuggerSession::new(
        Arc::new(RemoteDebugger::connect_to(addr.to_string(), WAIT)),
        host.clone(),
        PositionConverter::new(),
        BreakpointKinds::default(),
        SessionOptions {
            connect_timeout: Duration::from_millis(300),
            ..Default::default()
        },
    ));

    let result = session.start().await.unwrap();
    assert!(matches!(result, Err(Error::ConnectTimeout(_))));
    assert!(session.is_closed());
}
