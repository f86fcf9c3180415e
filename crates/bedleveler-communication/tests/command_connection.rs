use bedleveler_communication::firmware::marlin2::commands::{M105, M114};
use bedleveler_communication::firmware::marlin2::ConnectionEvent;
use bedleveler_communication::{Command, CommandConnection, CommandReply, GCode, LineWriter};
use bedleveler_core::ConnectionError;

#[derive(Default)]
struct Recorder(Vec<String>);

impl LineWriter for Recorder {
    fn write_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        self.0.push(line.to_string());
        Ok(())
    }
}

fn command(gcode: GCode) -> Command {
    Command::new(gcode).unwrap()
}

fn completed(events: Vec<ConnectionEvent>) -> Vec<(u64, CommandReply)> {
    events
        .into_iter()
        .filter_map(|event| match event {
            ConnectionEvent::Completed { ticket, outcome } => Some((ticket, outcome.unwrap())),
            ConnectionEvent::Written { .. } => None,
        })
        .collect()
}

#[test]
fn test_commands_complete_in_fifo_order() {
    let mut connection = CommandConnection::new(Recorder::default());
    let first = connection.send(command(GCode::G90)).unwrap();
    let second = connection.send(command(GCode::M114(M114::default()))).unwrap();
    let third = connection.send(command(GCode::M400)).unwrap();

    // Only the first command is on the wire
    assert_eq!(connection.writer().0, vec!["G90"]);

    connection.receive(b"ok\n").unwrap();
    assert_eq!(connection.writer().0, vec!["G90", "M114"]);

    connection
        .receive(b"X:1.00 Y:2.00 Z:3.00 E:0.00 Count X:80 Y:160 Z:1200\nok\n")
        .unwrap();
    assert_eq!(connection.writer().0, vec!["G90", "M114", "M400"]);

    connection.receive(b"ok\n").unwrap();
    assert!(connection.is_idle());

    let done = completed(connection.take_events());
    let tickets: Vec<u64> = done.iter().map(|(ticket, _)| *ticket).collect();
    assert_eq!(tickets, vec![first, second, third]);
    assert!(matches!(&done[1].1, CommandReply::Position(p) if p.z == 3.0));
}

#[test]
fn test_reply_split_across_reads() {
    let mut connection = CommandConnection::new(Recorder::default());
    connection.send(command(GCode::M105(M105::default()))).unwrap();

    connection.receive(b"ok T:20.0 /0.0 B:2").unwrap();
    assert_eq!(connection.active_ticket(), Some(1));
    connection.receive(b"1.0 /0.0 @:0 B@:0\r\n").unwrap();

    let done = completed(connection.take_events());
    assert!(matches!(&done[0].1, CommandReply::Temperatures(t) if t.bed_actual == 21.0));
}

#[test]
fn test_detached_command_consumes_its_reply() {
    let mut connection = CommandConnection::new(Recorder::default());
    let probe = connection.send(command(GCode::M114(M114::default()))).unwrap();
    let queued = connection.send(command(GCode::G90)).unwrap();

    assert!(connection.detach(queued));
    assert!(connection.detach(probe));
    assert!(!connection.detach(99));
    connection.take_events();

    connection
        .receive(b"X:1.00 Y:2.00 Z:3.00 E:0.00 Count X:80 Y:160 Z:1200\nok\n")
        .unwrap();
    assert!(connection.is_idle());
    assert!(completed(connection.take_events()).is_empty());
    assert_eq!(connection.writer().0, vec!["M114"]);

    // Late duplicate acknowledgement after the abort
    connection.receive(b"ok\n").unwrap();
}

#[test]
fn test_stray_line_is_fatal_when_nothing_was_sent() {
    let mut connection = CommandConnection::new(Recorder::default());
    connection.receive(b"//action:notification\n").unwrap();
    connection.receive(b" T:20.0 /0.0 B:21.0 /0.0 @:0 B@:0\n").unwrap();

    let err = connection.receive(b"ok\n").unwrap_err();
    assert_eq!(
        err,
        ConnectionError::UnexpectedLine {
            line: "ok".to_string()
        }
    );
}
