//! Round-trips a launch specification through a real file on disk, the
//! way `porthouse launch --cfg <file>` actually reads one (spec §4.E,
//! §6), rather than a parser-only string fixture.

use std::io::Write;

use porthouse::launcher::parse_launch_spec;

const SPEC_YAML: &str = r#"
name: ground-station-1
exchanges:
  log: topic
  event: topic
  rotator: topic
modules:
  - name: uhf-rotator
    module: porthouse.rotator.Controller
    params:
      - name: port
        value: "/dev/ttyUSB0"
      - name: baud
        value: "9600"
        type: integer
      - name: amqp_url
        value: "GLOBAL:amqp_url"
"#;

#[test]
fn a_launch_spec_written_to_disk_parses_and_validates() {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(SPEC_YAML.as_bytes()).expect("write spec");
    file.flush().expect("flush");

    let contents = std::fs::read_to_string(file.path()).expect("read back");
    let spec = parse_launch_spec(&file.path().display().to_string(), &contents)
        .expect("well-formed spec parses and validates");

    assert_eq!(spec.name.as_deref(), Some("ground-station-1"));
    assert_eq!(spec.exchanges.len(), 3);
    assert_eq!(spec.modules.len(), 1);

    let module = &spec.modules[0];
    assert_eq!(module.module, "porthouse.rotator.Controller");
    assert_eq!(module.params.len(), 3);
    assert_eq!(module.params[2].value.as_str(), Some("GLOBAL:amqp_url"));
}

#[test]
fn a_spec_with_an_unknown_exchange_kind_fails_validation() {
    let bad = SPEC_YAML.replace("log: topic", "log: carrier-pigeon");
    let err = parse_launch_spec("bad.yaml", &bad).expect_err("unknown exchange kind must be rejected");
    assert!(format!("{err}").contains("carrier-pigeon") || format!("{err:?}").contains("carrier-pigeon"));
}
