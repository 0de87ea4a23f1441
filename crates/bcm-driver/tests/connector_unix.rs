//! 连接器端到端测试
//!
//! 用 `UnixDatagram::pair()` 的一端代替内核 BCM socket：连接器写出的每条消息
//! 都能在另一端按数据报读出并解码，另一端写入的数据报则作为“内核通知”进入接收管线。

use bcm_driver::{
    BcmHandler, Connector, ConnectorConfig, ConnectorError, ConnectorState, CyclicTask, RequestId,
    SendCompletion, Severity,
};
use bcm_protocol::{
    BCM_MAX_MESSAGE_SIZE, BcmFrames, BcmMessage, BcmMsgHead, BcmTimeval, CanFdFrame, CanFrame,
    Frame, FrameError, FrameKind, Opcode, ProtocolError, codec,
};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum Event {
    Message(BcmMessage),
    Completed {
        id: RequestId,
        ok: bool,
        cancelled: bool,
        bytes: Vec<u8>,
    },
    Error(Severity),
}

/// 把所有回调转成事件，供测试线程断言
struct EventHandler(Sender<Event>);

impl BcmHandler for EventHandler {
    fn on_message(&mut self, message: &BcmMessage) {
        let _ = self.0.send(Event::Message(message.clone()));
    }

    fn on_send_complete(&mut self, completion: &SendCompletion) {
        let _ = self.0.send(Event::Completed {
            id: completion.id,
            ok: completion.is_ok(),
            cancelled: completion.is_cancelled(),
            bytes: completion.bytes.to_vec(),
        });
    }

    fn on_error(&mut self, severity: Severity, _message: &str) {
        let _ = self.0.send(Event::Error(severity));
    }
}

const TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> ConnectorConfig {
    ConnectorConfig {
        poll_interval_ms: 10,
        thread_name: "bcm-test-reactor".to_string(),
        ..ConnectorConfig::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start(config: ConnectorConfig) -> (Connector, UnixDatagram, Receiver<Event>) {
    init_tracing();
    let (local, peer) = UnixDatagram::pair().unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();
    let (event_tx, events) = crossbeam_channel::unbounded();
    let connector = Connector::with_transport(local, config, EventHandler(event_tx)).unwrap();
    (connector, peer, events)
}

fn recv_message(peer: &UnixDatagram) -> BcmMessage {
    let mut buf = vec![0u8; BCM_MAX_MESSAGE_SIZE];
    let n = peer.recv(&mut buf).expect("no datagram from connector");
    codec::decode(&buf[..n]).unwrap()
}

fn classic(id: u16, data: &[u8]) -> Frame {
    CanFrame::new_standard(id, data).unwrap().into()
}

#[test]
fn test_send_multiple_issues_ordered_single_frame_messages() {
    let (connector, peer, _events) = start(test_config());
    let frames = [classic(0x101, &[1]), classic(0x102, &[2, 2]), classic(0x103, &[3, 3, 3])];

    let ids = connector.tx_send_multiple(&frames, false).unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    for expected in &frames {
        let message = recv_message(&peer);
        assert_eq!(message.opcode(), Opcode::TxSend);
        assert_eq!(message.head.nframes, 1);
        assert_eq!(message.head.flags, 0);
        assert_eq!(message.frames.get(0).as_ref(), Some(expected));
    }

    connector.shutdown().unwrap();
    assert_eq!(connector.metrics().tx_completed, 3);
}

#[test]
fn test_classic_frame_sent_as_fd() {
    let (connector, peer, _events) = start(test_config());

    connector.tx_send_single(classic(0x7FF, &[0xAA, 0xBB]), true).unwrap();

    let message = recv_message(&peer);
    assert!(message.is_fd());
    match message.frames.get(0) {
        Some(Frame::Fd(frame)) => {
            assert_eq!(frame.raw_id(), 0x7FF);
            assert_eq!(frame.data(), &[0xAA, 0xBB]);
        },
        other => panic!("Expected FD frame, got {:?}", other),
    }
}

#[test]
fn test_setup_and_delete_cyclic_fd_task() {
    let (connector, peer, _events) = start(test_config());
    let data: Vec<u8> = [0xDE, 0xAD, 0xBE, 0xEF].repeat(4);
    let frame: Frame = CanFdFrame::from_raw_id(0x567, &data).unwrap().into();

    connector
        .tx_setup_cyclic(&[frame], 3, Duration::from_micros(500), Duration::from_secs(1), true)
        .unwrap();

    let setup = recv_message(&peer);
    assert_eq!(setup.opcode(), Opcode::TxSetup);
    assert!(setup.is_fd());
    assert!(setup.head.starts_timer());
    assert_eq!(setup.head.count, 3);
    assert_eq!(setup.head.ival1, BcmTimeval::new(0, 500));
    assert_eq!(setup.head.ival2, BcmTimeval::new(1, 0));
    assert_eq!(setup.head.nframes, 1);
    assert_eq!(setup.frames.get(0), Some(frame));
    assert_eq!(
        connector.active_cyclic_tasks(),
        vec![CyclicTask {
            can_id: 0x567,
            kind: FrameKind::Fd
        }]
    );

    connector.tx_delete_cyclic(0x567, true).unwrap();

    let delete = recv_message(&peer);
    assert_eq!(delete.opcode(), Opcode::TxDelete);
    assert_eq!(delete.can_id(), 0x567);
    assert_eq!(delete.head.nframes, 0);
    assert!(delete.is_fd());
    assert!(connector.active_cyclic_tasks().is_empty());
}

#[test]
fn test_rx_filter_messages() {
    let (connector, peer, _events) = start(test_config());

    connector
        .rx_setup_filter(0x321, false, Duration::from_secs(2), Duration::from_millis(100))
        .unwrap();
    connector.rx_delete_filter(0x321, false).unwrap();

    let setup = recv_message(&peer);
    assert_eq!(setup.opcode(), Opcode::RxSetup);
    assert_eq!(setup.can_id(), 0x321);
    assert_eq!(setup.head.ival1, BcmTimeval::new(2, 0));
    assert_eq!(setup.head.ival2, BcmTimeval::new(0, 100_000));

    let delete = recv_message(&peer);
    assert_eq!(delete.opcode(), Opcode::RxDelete);
    assert_eq!(delete.can_id(), 0x321);
}

#[test]
fn test_inbound_notification_dispatched() {
    let (connector, peer, events) = start(test_config());

    let notification = BcmMessage {
        head: BcmMsgHead::new(Opcode::RxChanged, 0x123),
        frames: BcmFrames::Classic(vec![CanFrame::new_standard(0x123, &[0xCA, 0xFE]).unwrap()]),
    };
    peer.send(&codec::encode(&notification).unwrap()).unwrap();

    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Message(message) => {
            assert_eq!(message.opcode(), Opcode::RxChanged);
            assert_eq!(message.can_id(), 0x123);
            assert_eq!(message.frames, notification.frames);
        },
        other => panic!("Expected message event, got {:?}", other),
    }

    connector.shutdown().unwrap();
    assert_eq!(connector.metrics().rx_dispatched, 1);
}

#[test]
fn test_runt_datagram_discarded_and_loop_continues() {
    let (connector, peer, events) = start(test_config());

    peer.send(&[0u8; 5]).unwrap();
    peer.send(&codec::encode_send(&classic(0x42, &[4, 2]))).unwrap();

    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Error(severity) => assert_eq!(severity, Severity::Warning),
        other => panic!("Expected warning, got {:?}", other),
    }
    match events.recv_timeout(TIMEOUT).unwrap() {
        Event::Message(message) => assert_eq!(message.can_id(), 0x42),
        other => panic!("Expected message event, got {:?}", other),
    }

    connector.shutdown().unwrap();
    let snapshot = connector.metrics();
    assert_eq!(snapshot.rx_datagrams, 2);
    assert_eq!(snapshot.rx_discarded, 1);
    assert_eq!(snapshot.rx_dispatched, 1);
    // 初次投递 + 每次完成后一次
    assert_eq!(snapshot.rx_arms, 3);
}

#[test]
fn test_encode_errors_are_synchronous() {
    let config = ConnectorConfig {
        max_frames: 4,
        ..test_config()
    };
    let (connector, _peer, _events) = start(config);

    let err = connector
        .tx_setup_cyclic(&[], 0, Duration::ZERO, Duration::from_millis(10), false)
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Protocol(ProtocolError::EmptyFrames)));

    let frames = vec![classic(0x1, &[]); 5];
    let err = connector
        .tx_setup_cyclic(&frames, 0, Duration::ZERO, Duration::from_millis(10), false)
        .unwrap_err();
    assert!(matches!(err, ConnectorError::TooManyFrames { count: 5, max: 4 }));

    let mixed = [classic(0x1, &[]), CanFdFrame::new_standard(0x2, &[]).unwrap().into()];
    let err = connector
        .tx_setup_cyclic(&mixed, 0, Duration::ZERO, Duration::from_millis(10), false)
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectorError::Protocol(ProtocolError::MixedFrameKinds { index: 1 })
    ));

    let wide: Frame = CanFdFrame::new_standard(0x3, &[0u8; 12]).unwrap().into();
    let err = connector.tx_send_single(wide, false).unwrap_err();
    assert!(matches!(err, ConnectorError::Frame(FrameError::LossyConversion { .. })));

    // 批量发送中任何一帧失败则一条都不提交
    let err = connector.tx_send_multiple(&[classic(0x4, &[1]), wide], false).unwrap_err();
    assert!(matches!(err, ConnectorError::Frame(_)));

    assert!(connector.is_running());
    assert_eq!(connector.metrics().tx_submitted, 0);
    assert!(connector.active_cyclic_tasks().is_empty());
}

#[test]
fn test_calls_after_shutdown_fail_fast() {
    let (connector, _peer, events) = start(test_config());
    assert_eq!(connector.state(), ConnectorState::Running);

    connector.shutdown().unwrap();
    assert_eq!(connector.state(), ConnectorState::Stopped);

    let err = connector.tx_send_single(classic(0x1, &[1]), false).unwrap_err();
    assert!(matches!(
        err,
        ConnectorError::NotRunning {
            state: ConnectorState::Stopped
        }
    ));
    assert!(connector.tx_delete_cyclic(0x1, false).is_err());
    assert!(connector.rx_setup_filter(0x1, false, Duration::ZERO, Duration::ZERO).is_err());

    // 幂等
    connector.shutdown().unwrap();

    // handler 随 reactor 线程一起释放，之后不会再有回调
    while events.try_recv().is_ok() {}
    assert!(matches!(
        events.try_recv(),
        Err(crossbeam_channel::TryRecvError::Disconnected)
    ));
}

#[test]
fn test_send_failure_reported_once() {
    let (connector, peer, events) = start(test_config());
    drop(peer);

    let first = connector.tx_send_single(classic(0x10, &[1]), false).unwrap();
    let second = connector.tx_send_single(classic(0x11, &[2]), false).unwrap();

    let mut failed = Vec::new();
    let mut errors = 0;
    while failed.len() < 2 {
        match events.recv_timeout(TIMEOUT).unwrap() {
            Event::Completed { id, ok, cancelled, .. } => {
                assert!(!ok);
                assert!(!cancelled);
                failed.push(id);
            },
            Event::Error(severity) => {
                assert_eq!(severity, Severity::Error);
                errors += 1;
            },
            Event::Message(message) => panic!("Unexpected message {:?}", message),
        }
    }
    assert_eq!(failed, vec![first, second]);

    // 失败不影响连接器运行
    assert!(connector.is_running());
    connector.shutdown().unwrap();
    assert_eq!(errors, 2);
    assert_eq!(connector.metrics().tx_failed, 2);
}

#[test]
fn test_concurrent_senders_keep_bytes_intact() {
    const THREADS: u8 = 4;
    const PER_THREAD: u8 = 50;

    let (connector, peer, events) = start(test_config());
    let connector = Arc::new(connector);

    // 持续读出，避免对端接收队列写满
    let reader = thread::spawn(move || {
        let mut datagrams = Vec::new();
        let mut buf = vec![0u8; BCM_MAX_MESSAGE_SIZE];
        while datagrams.len() < (THREADS as usize) * (PER_THREAD as usize) {
            let n = peer.recv(&mut buf).expect("reader timed out");
            datagrams.push(buf[..n].to_vec());
        }
        datagrams
    });

    let senders: Vec<_> = (0..THREADS)
        .map(|t| {
            let connector = connector.clone();
            thread::spawn(move || {
                let mut sent = Vec::new();
                for i in 0..PER_THREAD {
                    let frame: Frame = CanFdFrame::new_standard(0x100 + t as u16, &[t, i, t, i])
                        .unwrap()
                        .into();
                    let id = connector.tx_send_single(frame, true).unwrap();
                    sent.push((id, codec::encode_send(&frame)));
                }
                sent
            })
        })
        .collect();

    let mut expected: HashMap<RequestId, Vec<u8>> = HashMap::new();
    for sender in senders {
        expected.extend(sender.join().unwrap());
    }
    assert_eq!(expected.len(), (THREADS as usize) * (PER_THREAD as usize));

    let mut completed = 0;
    while completed < expected.len() {
        if let Event::Completed { id, ok, bytes, .. } = events.recv_timeout(TIMEOUT).unwrap() {
            assert!(ok);
            assert_eq!(expected.get(&id), Some(&bytes), "completion {} carries foreign bytes", id);
            completed += 1;
        }
    }

    let datagrams = reader.join().unwrap();
    for datagram in &datagrams {
        assert!(expected.values().any(|bytes| bytes == datagram));
    }

    connector.shutdown().unwrap();
}

#[test]
fn test_shutdown_cancels_unsent() {
    const COUNT: usize = 2000;

    let (connector, _peer, events) = start(test_config());
    let frame: Frame = CanFdFrame::new_standard(0x200, &[0x55; 64]).unwrap().into();

    // 对端从不读取，发送很快遇到 WouldBlock
    for _ in 0..COUNT {
        connector.tx_send_single(frame, true).unwrap();
    }
    connector.shutdown().unwrap();

    let mut ok = 0;
    let mut cancelled = 0;
    for event in events.try_iter() {
        match event {
            Event::Completed { ok: true, .. } => ok += 1,
            Event::Completed { cancelled: true, .. } => cancelled += 1,
            _ => {},
        }
    }

    assert_eq!(ok + cancelled, COUNT);
    assert!(cancelled > 0);
    let snapshot = connector.metrics();
    assert_eq!(snapshot.tx_cancelled as usize, cancelled);
    assert_eq!(snapshot.tx_in_flight(), 0);
}
