use bedleveler_communication::firmware::marlin2::{Calibration, Completion};
use bedleveler_communication::{LineWriter, Marlin2Engine, Marlin2Printer, TransportEvent};
use bedleveler_core::{
    Bounds, CommandPrinter, ConnectionError, EventDispatcher, OperationError, OperationOutput,
    OperationRequest, PrinterEvent, ProbeOffsets, ProbeResult, ProbeSettings, SharedProbeSettings,
};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

const HOMED: &[u8] = b"X:0.00 Y:0.00 Z:10.00 E:0.00 Count X:0 Y:0 Z:4000\nok\n";
const OFFSETS: &[u8] = b"M851 X-40.00 Y-10.00 Z-1.25 ; (mm)\nok\n";
const ENDSTOPS: &[u8] = b"M211 S1\nMin:  X0.00 Y0.00 Z0.00   Max:  X235.00 Y235.00 Z250.00\nok\n";
const PROBED: &[u8] =
    b"Bed X: 37.50 Y: 37.50 Z: 0.125\nX:37.50 Y:37.50 Z:5.00 E:0.00 Count X:3000 Y:3000 Z:400\nok\n";

#[derive(Default)]
struct Recorder(Vec<String>);

impl LineWriter for Recorder {
    fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        self.0.push(line.to_string());
        Ok(())
    }
}

fn engine() -> (Marlin2Engine<Recorder>, EventDispatcher, SharedProbeSettings) {
    let events = EventDispatcher::default();
    let settings: SharedProbeSettings = Arc::new(RwLock::new(None));
    let engine = Marlin2Engine::new(Recorder::default(), events.clone(), settings.clone());
    (engine, events, settings)
}

fn written(engine: &Marlin2Engine<Recorder>) -> Vec<String> {
    engine.connection().writer().0.clone()
}

fn single(completions: Vec<Completion>) -> Completion {
    assert_eq!(completions.len(), 1, "{:?}", completions);
    completions.into_iter().next().unwrap()
}

fn init(engine: &mut Marlin2Engine<Recorder>) {
    engine
        .submit(1, "init".to_string(), json!(null), OperationRequest::Init)
        .unwrap();
    for reply in [HOMED, OFFSETS, ENDSTOPS, b"ok\n".as_slice()] {
        engine.receive(reply).unwrap();
    }
    let completion = single(engine.take_completions());
    assert!(matches!(completion.outcome, Ok(OperationOutput::Initialized)));
}

#[test]
fn test_init_caches_calibration_and_defaults() {
    let (mut engine, events, settings) = engine();
    let mut rx = events.subscribe();
    init(&mut engine);

    assert_eq!(written(&engine), vec!["G28", "M851", "M211", "G90"]);
    assert_eq!(
        engine.calibration(),
        Some(Calibration {
            offsets: ProbeOffsets {
                x: -40.0,
                y: -10.0,
                z: -1.25,
            },
            bounds: Bounds {
                min_x: 0.0,
                max_x: 235.0,
                min_y: 0.0,
                max_y: 235.0,
                min_z: 0.0,
                max_z: 250.0,
            },
        })
    );
    assert_eq!(
        *settings.read(),
        Some(ProbeSettings::new(1, 10.0, 5000.0).unwrap())
    );

    let mut sent = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            PrinterEvent::Sent { command, id, .. } => {
                assert_eq!(id, "init");
                sent.push(command);
            }
            PrinterEvent::Finished { output, .. } => {
                assert_eq!(output, OperationOutput::Initialized)
            }
            other => panic!("unexpected event {}", other),
        }
    }
    assert_eq!(sent, vec!["G28", "M851", "M211", "G90"]);
}

#[test]
fn test_cached_calibration_skips_queries() {
    let (mut engine, _events, _settings) = engine();
    init(&mut engine);

    engine
        .submit(2, "bounds".to_string(), json!(null), OperationRequest::GetTravelBounds)
        .unwrap();
    let completion = single(engine.take_completions());
    assert_eq!(completion.key, 2);
    assert!(matches!(
        completion.outcome,
        Ok(OperationOutput::TravelBounds(b)) if b.max_x == 235.0
    ));
    assert_eq!(written(&engine).len(), 4);

    engine
        .submit(
            3,
            "probe".to_string(),
            json!({"point": "center"}),
            OperationRequest::Probe { x: 37.5, y: 37.5 },
        )
        .unwrap();
    assert_eq!(written(&engine)[4], "G0 F5000 X77.5 Y47.5 Z10");

    engine.receive(b"ok\n").unwrap();
    assert_eq!(written(&engine)[5], "G30 E1 X37.5 Y37.5");

    engine.receive(PROBED).unwrap();
    let completion = single(engine.take_completions());
    assert_eq!(
        completion.outcome.unwrap(),
        OperationOutput::Probed(ProbeResult {
            x: 37.5,
            y: 37.5,
            z: 0.125,
        })
    );
    assert_eq!(engine.active_count(), 0);
}

#[test]
fn test_probe_averages_samples() {
    let (mut engine, _events, settings) = engine();
    *settings.write() = Some(ProbeSettings::new(2, 5.0, 3000.0).unwrap());

    engine
        .submit(
            1,
            "probe".to_string(),
            json!(null),
            OperationRequest::Probe { x: 37.5, y: 37.5 },
        )
        .unwrap();
    engine.receive(OFFSETS).unwrap();
    engine.receive(b"ok\n").unwrap();
    engine.receive(PROBED).unwrap();
    engine.receive(b"ok\n").unwrap();
    engine
        .receive(b"Bed X: 37.50 Y: 37.50 Z: 0.075\nX:37.50 Y:37.50 Z:5.00 E:0.00 Count X:3000 Y:3000 Z:400\nok\n")
        .unwrap();

    assert_eq!(
        written(&engine),
        vec![
            "M851",
            "G0 F3000 X77.5 Y47.5 Z5",
            "G30 E1 X37.5 Y37.5",
            "G0 F3000 X77.5 Y47.5 Z5",
            "G30 E1 X37.5 Y37.5",
        ]
    );
    let completion = single(engine.take_completions());
    match completion.outcome {
        Ok(OperationOutput::Probed(result)) => assert!((result.z - 0.1).abs() < 1e-9),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_probe_past_bed_fails_operation() {
    let (mut engine, events, _settings) = engine();
    let mut rx = events.subscribe();
    init(&mut engine);

    engine
        .submit(
            2,
            "probe".to_string(),
            json!(null),
            OperationRequest::Probe { x: 500.0, y: 500.0 },
        )
        .unwrap();
    engine.receive(b"ok\n").unwrap();
    engine.receive(b"Z Probe Past Bed\nok\n").unwrap();

    let completion = single(engine.take_completions());
    let err = completion.outcome.unwrap_err();
    assert!(err.is_firmware_error());

    let failed = std::iter::from_fn(|| rx.try_recv().ok())
        .find(|event| matches!(event, PrinterEvent::Failed { .. }));
    match failed {
        Some(PrinterEvent::Failed { id, message, .. }) => {
            assert_eq!(id, "probe");
            assert_eq!(message, "Z Probe Past Bed");
        }
        other => panic!("expected a failure event, got {:?}", other),
    }
}

#[test]
fn test_abort_mid_probe_tolerates_stale_lines() {
    let (mut engine, _events, _settings) = engine();
    engine
        .submit(
            7,
            "probe".to_string(),
            json!(null),
            OperationRequest::Probe { x: 37.5, y: 37.5 },
        )
        .unwrap();
    engine.receive(OFFSETS).unwrap();
    assert_eq!(written(&engine), vec!["M851", "G0 F5000 X77.5 Y47.5 Z10"]);

    assert_eq!(engine.abort(), vec![7]);
    assert_eq!(engine.active_count(), 0);

    // Acknowledgement of the in-flight move, then a late duplicate
    engine.receive(b"ok\n").unwrap();
    engine.receive(b"ok\n").unwrap();
    assert!(engine.take_completions().is_empty());
    assert_eq!(written(&engine).len(), 2);

    engine
        .submit(
            8,
            "position".to_string(),
            json!(null),
            OperationRequest::GetCurrentPosition,
        )
        .unwrap();
    assert_eq!(written(&engine)[2], "M114");
    engine
        .receive(b"X:77.50 Y:47.50 Z:10.00 E:0.00 Count X:6200 Y:3800 Z:4000\nok\n")
        .unwrap();
    let completion = single(engine.take_completions());
    assert!(matches!(
        completion.outcome,
        Ok(OperationOutput::CurrentPosition(p)) if p.x == 77.5 && p.z == 10.0
    ));
}

#[test]
fn test_stray_line_and_lost_connection() {
    let (mut engine, _events, _settings) = engine();
    assert!(engine.receive(b"ok\n").is_err());

    engine
        .submit(1, "temps".to_string(), json!(null), OperationRequest::GetTemperatures)
        .unwrap();
    engine.fail_all(ConnectionError::ConnectionLost {
        reason: "Port closed".to_string(),
    });
    let completion = single(engine.take_completions());
    assert!(completion.outcome.unwrap_err().is_connection_error());
    assert!(engine.connection().is_idle());
}

#[test]
fn test_send_line_collects_reply_transcript() {
    let (mut engine, events, _settings) = engine();
    let mut rx = events.subscribe();

    engine
        .submit(
            1,
            "console".to_string(),
            json!({"source": "console"}),
            OperationRequest::SendLine {
                line: "M503".to_string(),
            },
        )
        .unwrap();
    engine
        .submit(2, "temps".to_string(), json!(null), OperationRequest::GetTemperatures)
        .unwrap();
    assert_eq!(written(&engine), vec!["M503"]);

    engine
        .receive(b"echo:; Linear Units:\necho:  G21 ; (mm)\n//action:notification\nok\n")
        .unwrap();
    let completion = single(engine.take_completions());
    assert_eq!(completion.key, 1);
    assert_eq!(
        completion.outcome.unwrap(),
        OperationOutput::LineSent(vec![
            "echo:; Linear Units:".to_string(),
            "echo:  G21 ; (mm)".to_string(),
            "//action:notification".to_string(),
            "ok".to_string(),
        ])
    );

    // The next queued command goes out only after the console line finished
    assert_eq!(written(&engine), vec!["M503", "M105"]);
    engine
        .receive(b"ok T:20.0 /0.0 B:21.0 /0.0 @:0 B@:0\n")
        .unwrap();
    assert_eq!(single(engine.take_completions()).key, 2);

    match rx.try_recv().unwrap() {
        PrinterEvent::Sent { command, context, .. } => {
            assert_eq!(command, "M503");
            assert_eq!(context, json!({"source": "console"}));
        }
        other => panic!("unexpected event {}", other),
    }
}

#[test]
fn test_send_line_rejects_empty_line() {
    let (mut engine, _events, _settings) = engine();
    engine
        .submit(
            1,
            "console".to_string(),
            json!(null),
            OperationRequest::SendLine {
                line: "   ".to_string(),
            },
        )
        .unwrap();
    let completion = single(engine.take_completions());
    assert!(completion.outcome.unwrap_err().is_usage_error());
    assert!(written(&engine).is_empty());
}

struct ChannelWriter(mpsc::UnboundedSender<String>);

impl LineWriter for ChannelWriter {
    fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        self.0
            .send(line.to_string())
            .map_err(|_| ConnectionError::NotConnected)
    }
}

fn printer() -> (
    Arc<Marlin2Printer>,
    mpsc::UnboundedReceiver<String>,
    mpsc::Sender<TransportEvent>,
) {
    let (line_tx, lines) = mpsc::unbounded_channel();
    let (transport_tx, transport_rx) = mpsc::channel(16);
    let printer = Marlin2Printer::with_transport(ChannelWriter(line_tx), transport_rx);
    (Arc::new(printer), lines, transport_tx)
}

#[tokio::test]
async fn test_printer_reads_temperatures() {
    let (printer, mut lines, transport) = printer();
    let mut events = printer.subscribe();

    let task = {
        let printer = printer.clone();
        tokio::spawn(async move {
            printer
                .get_temperatures("t1".to_string(), json!({"step": 3}))
                .await
        })
    };

    assert_eq!(lines.recv().await.unwrap(), "M105");
    transport
        .send(TransportEvent::Data(
            b"ok T:200.00 /200.00 B:60.0".to_vec(),
        ))
        .await
        .unwrap();
    transport
        .send(TransportEvent::Data(b"0 /60.00 @:63.5 B@:127\n".to_vec()))
        .await
        .unwrap();

    let temperatures = task.await.unwrap().unwrap();
    assert_eq!(temperatures.tool_actual, 200.0);
    assert_eq!(temperatures.bed_actual, 60.0);
    assert_eq!(temperatures.tool_power, 0.5);
    assert_eq!(temperatures.bed_power, 1.0);

    match events.recv().await.unwrap() {
        PrinterEvent::Sent {
            command, context, ..
        } => {
            assert_eq!(command, "M105");
            assert_eq!(context, json!({"step": 3}));
        }
        other => panic!("unexpected event {}", other),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        PrinterEvent::Finished { .. }
    ));
}

#[tokio::test]
async fn test_printer_abort_then_continue() {
    let (printer, mut lines, transport) = printer();

    let task = {
        let printer = printer.clone();
        tokio::spawn(async move {
            printer
                .probe("p1".to_string(), json!(null), 37.5, 37.5)
                .await
        })
    };
    assert_eq!(lines.recv().await.unwrap(), "M851");

    printer.abort();
    assert!(matches!(task.await.unwrap(), Err(OperationError::Aborted)));

    transport
        .send(TransportEvent::Data(OFFSETS.to_vec()))
        .await
        .unwrap();

    let task = {
        let printer = printer.clone();
        tokio::spawn(async move {
            printer
                .get_current_position("p2".to_string(), json!(null))
                .await
        })
    };
    assert_eq!(lines.recv().await.unwrap(), "M114");
    transport
        .send(TransportEvent::Data(
            b"X:1.00 Y:2.00 Z:3.00 E:0.00 Count X:80 Y:160 Z:1200\nok\n".to_vec(),
        ))
        .await
        .unwrap();

    let position = task.await.unwrap().unwrap();
    assert_eq!((position.x, position.y, position.z), (1.0, 2.0, 3.0));
    assert!(printer.is_connected());
}

#[tokio::test]
async fn test_printer_fails_pending_operations_when_port_closes() {
    let (printer, mut lines, transport) = printer();

    let task = {
        let printer = printer.clone();
        tokio::spawn(async move { printer.home("h1".to_string(), json!(null), Default::default()).await })
    };
    assert_eq!(lines.recv().await.unwrap(), "G28");

    transport.send(TransportEvent::Closed).await.unwrap();
    match task.await.unwrap() {
        Err(OperationError::Failed(e)) => assert!(e.is_connection_error()),
        other => panic!("unexpected result {:?}", other),
    }

    let err = printer
        .get_temperatures("t2".to_string(), json!(null))
        .await
        .unwrap_err();
    assert!(matches!(err, OperationError::Failed(e) if e.is_connection_error()));
}
