use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use deploy_jdwp::{
    connect_jdwp, request_jdwp, ChunkType, ClientState, CommandId, DdmPacket, DeviceState,
    DispatchTable, FakeDeviceServer, JdwpError, JdwpPacket, JdwpReader, JdwpService,
    SessionSettings, HANDSHAKE,
};

const PID: u32 = 4321;

fn spawn_device(api_level: u32) -> (SocketAddr, Arc<DeviceState>) {
    let device = Arc::new(DeviceState::new("emulator-5554", api_level));
    device.start_client(
        ClientState::new(PID, 10_042, "com.example.app", "com.example.app", false)
            .with_abi("64-bit")
            .with_features(["view-hierarchy"]),
    );
    let service = JdwpService::new(
        device.clone(),
        Arc::new(DispatchTable::with_defaults()),
        SessionSettings {
            poll_interval: Duration::from_millis(10),
            ..SessionSettings::default()
        },
    );
    let server = FakeDeviceServer::bind("127.0.0.1:0", service).unwrap();
    let (addr, _handle) = server.spawn().unwrap();
    (addr, device)
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn helo(stream: &mut TcpStream, id: u32) -> JdwpPacket {
    DdmPacket {
        id,
        chunk_type: ChunkType::HELO,
        payload: vec![0, 0, 0, 1],
    }
    .into_command()
    .write_to(stream)
    .unwrap();
    JdwpPacket::read_from(stream).unwrap()
}

#[test]
fn handshake_then_helo_round_trip() {
    let (addr, _device) = spawn_device(30);
    let mut stream = connect_jdwp(addr, PID).unwrap();

    let reply = helo(&mut stream, 1);
    assert!(reply.is_reply());
    assert_eq!(reply.id, 1);

    let mut r = JdwpReader::new(&reply.payload);
    assert_eq!(ChunkType(r.read_u32().unwrap()), ChunkType::HELO);
    let _len = r.read_u32().unwrap();
    assert_eq!(r.read_u32().unwrap(), 1);
    assert_eq!(r.read_u32().unwrap(), PID);
}

#[test]
fn bad_handshake_closes_without_reply() {
    let (addr, device) = spawn_device(30);
    let mut stream = TcpStream::connect(addr).unwrap();
    request_jdwp(&mut stream, PID).unwrap();

    stream.write_all(b"HTTP/1.1 GET /").unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    let client = device.client(PID).unwrap();
    wait_until(|| !client.session().is_active());
}

#[test]
fn unknown_command_does_not_end_session() {
    let (addr, _device) = spawn_device(30);
    let mut stream = connect_jdwp(addr, PID).unwrap();

    JdwpPacket::command(1, CommandId::new(64, 1), vec![1, 2, 3])
        .write_to(&mut stream)
        .unwrap();
    DdmPacket {
        id: 2,
        chunk_type: ChunkType::from_tag(b"XXXX"),
        payload: Vec::new(),
    }
    .into_command()
    .write_to(&mut stream)
    .unwrap();

    // Neither unknown packet is answered; the next known one is.
    let reply = helo(&mut stream, 3);
    assert_eq!(reply.id, 3);
}

#[test]
fn legacy_device_refuses_second_debugger() {
    let (addr, _device) = spawn_device(27);
    let _first = connect_jdwp(addr, PID).unwrap();

    match connect_jdwp(addr, PID) {
        Err(JdwpError::ServiceRejected(message)) => {
            assert_eq!(message, format!("JDWP Session already opened for pid: {PID}"))
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn modern_device_queues_second_debugger_until_release() {
    let (addr, device) = spawn_device(30);
    let mut first = connect_jdwp(addr, PID).unwrap();

    let (tx, rx) = mpsc::channel();
    let second = thread::spawn(move || {
        let stream = connect_jdwp(addr, PID);
        tx.send(()).unwrap();
        stream
    });

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    // VirtualMachine.Exit ends the first session.
    JdwpPacket::command(9, CommandId::VM_EXIT, vec![0; 4])
        .write_to(&mut first)
        .unwrap();
    let reply = JdwpPacket::read_from(&mut first).unwrap();
    assert_eq!(reply.id, 9);

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let mut second = second.join().unwrap().unwrap();
    assert_eq!(helo(&mut second, 1).id, 1);
    assert!(device.client(PID).unwrap().session().is_active());
}

#[test]
fn abnormal_close_releases_session() {
    let (addr, device) = spawn_device(27);
    let mut stream = connect_jdwp(addr, PID).unwrap();
    // Half a header, then the socket goes away.
    stream.write_all(&[0, 0, 0, 20, 0]).unwrap();
    stream.shutdown(Shutdown::Both).unwrap();
    drop(stream);

    let client = device.client(PID).unwrap();
    wait_until(|| !client.session().is_active());
    connect_jdwp(addr, PID).unwrap();
}

#[test]
fn stopping_the_client_fails_queued_debugger() {
    let (addr, device) = spawn_device(30);
    let _first = connect_jdwp(addr, PID).unwrap();

    let mut queued = TcpStream::connect(addr).unwrap();
    let handle = thread::spawn(move || request_jdwp(&mut queued, PID));

    thread::sleep(Duration::from_millis(50));
    device.stop_client(PID);

    match handle.join().unwrap() {
        // Depending on timing the request was either queued or arrived after
        // the client disappeared; both must be refused.
        Err(JdwpError::ServiceRejected(message)) => assert!(
            message.contains("stopped") || message.starts_with("No client exists"),
            "{message}"
        ),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn raw_handshake_bytes_are_echoed() {
    let (addr, _device) = spawn_device(33);
    let mut stream = TcpStream::connect(addr).unwrap();
    request_jdwp(&mut stream, PID).unwrap();

    stream.write_all(HANDSHAKE).unwrap();
    let mut echoed = [0u8; 14];
    stream.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, HANDSHAKE);
}

#[test]
fn waiting_client_announces_wait_after_helo() {
    let (addr, device) = spawn_device(30);
    device.start_client(ClientState::new(2, 10_002, "com.example.debug", "com.example.debug", true));
    let mut stream = connect_jdwp(addr, 2).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let reply = helo(&mut stream, 1);
    assert!(reply.is_reply());
    assert_eq!(reply.id, 1);

    let command = JdwpPacket::read_from(&mut stream).unwrap();
    assert!(command.is_ddm());
    let wait = DdmPacket::from_jdwp(&command).unwrap();
    assert_eq!(wait.chunk_type, ChunkType::WAIT);
    assert_eq!(wait.payload, [0]);
}

#[test]
fn sessions_on_different_pids_run_concurrently() {
    let (addr, device) = spawn_device(27);
    device.start_client(ClientState::new(2, 10_002, "com.example.other", "com.example.other", false));

    let mut a = connect_jdwp(addr, PID).unwrap();
    let mut b = connect_jdwp(addr, 2).unwrap();
    assert!(device.client(PID).unwrap().session().is_active());
    assert!(device.client(2).unwrap().session().is_active());

    for id in 1..=3 {
        let reply_a = helo(&mut a, id);
        let reply_b = helo(&mut b, id + 100);
        assert_eq!(reply_a.id, id);
        assert_eq!(reply_b.id, id + 100);

        let mut r = JdwpReader::new(&reply_b.payload);
        r.read_u32().unwrap();
        r.read_u32().unwrap();
        r.read_u32().unwrap();
        assert_eq!(r.read_u32().unwrap(), 2);
    }

    drop(a);
    wait_until(|| !device.client(PID).unwrap().session().is_active());
    assert!(device.client(2).unwrap().session().is_active());
    assert_eq!(helo(&mut b, 200).id, 200);
}
