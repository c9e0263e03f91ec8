//! Global subscriber installation. Kept in its own test binary so the
//! subscriber it installs does not leak into other tests.

use tether_provisioner::telemetry;

#[test]
fn test_init_installs_once() {
    assert!(telemetry::init("debug").is_ok());
    assert!(telemetry::init("info").is_err());
}
