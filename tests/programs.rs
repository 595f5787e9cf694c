// Whole programs run through the host with a configuration loaded from disk

#[cfg(test)]
mod tests {
    use std::io::Write;

    use cnc_motion::config::{self, MachineConfig};
    use cnc_motion::controller::{Controller, ProgramState};
    use cnc_motion::host::{HostReport, MotionHost};
    use cnc_motion::machine::MachineState;
    use tempfile::{NamedTempFile, tempdir};

    const MACHINE_TOML: &str = r#"
[planner]
pool_size = 16
reserve = 4

[runtime]
ticks_per_pass = 100

[axes.x]
max_feedrate = 4000.0
max_jerk = 500.0
"#;

    fn write_config() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MACHINE_TOML.as_bytes()).unwrap();
        file
    }

    async fn run_file(config: &MachineConfig, program: &str) -> (HostReport, MotionHost) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.nc");
        tokio::fs::write(&path, program).await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();

        let mut controller = Controller::simulated(config);
        controller.load_program(&text);
        let mut host = MotionHost::new(controller, false);
        let report = host.run().await;
        (report, host)
    }

    fn loaded_config() -> MachineConfig {
        let file = write_config();
        config::load_config(file.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let config = loaded_config();
        assert_eq!(config.planner.pool_size, 16);
        assert_eq!(config.runtime.ticks_per_pass, 100);
        assert_eq!(config.axes.x.max_jerk, 500.0);
        // untouched tables keep their defaults
        assert_eq!(config.axes.y.max_jerk, 340.0);
        assert_eq!(config.axes.a.max_travel, 360.0);
    }

    #[tokio::test]
    async fn test_offsets_program() {
        let config = loaded_config();
        let program = "\
(offsets and overrides)
G21 G90 G17
G0 X10 Y10
G92 X0 Y0
G1 X5 Y5 F3000     ; machine 15, 15
G92.1
G10 L2 P1 X20
G0 X5              ; machine 25
G53 G0 X1 Y1
G91 G1 X2 F2000
M2
";
        let (report, host) = run_file(&config, program).await;
        assert!(!report.interrupted);
        assert_eq!(report.program_state, ProgramState::Finished);
        assert!(host.controller().last_error().is_none());
        assert!((report.position[0] - 3.0).abs() < 1e-9);
        assert!((report.position[1] - 1.0).abs() < 1e-9);
        assert_eq!(host.controller().machine().machine_state(), MachineState::ProgramEnd);
        assert!(report.ticks > 0);
        assert_eq!(report.ticks % 100, 0);
    }

    #[tokio::test]
    async fn test_inch_program() {
        let config = loaded_config();
        let (report, _) = run_file(&config, "G20\nG0 X1 Y0.5\n").await;
        assert_eq!(report.program_state, ProgramState::Finished);
        assert!((report.position[0] - 25.4).abs() < 1e-9);
        assert!((report.position[1] - 12.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_dwell_takes_time() {
        let config = loaded_config();
        let (moving, _) = run_file(&config, "G1 X10 F3000\nG1 X20\n").await;
        let (dwelling, _) = run_file(&config, "G1 X10 F3000\nG4 P0.5\nG1 X20\n").await;
        assert_eq!(dwelling.program_state, ProgramState::Finished);
        assert!((dwelling.position[0] - 20.0).abs() < 1e-9);
        // half a second at 50 kHz
        assert!(dwelling.ticks >= moving.ticks + 20_000);
    }

    #[tokio::test]
    async fn test_bad_line_fails_program() {
        let config = loaded_config();
        let (report, host) = run_file(&config, "G0 X5\nG1 X10 Q3\nG0 X0\n").await;
        assert_eq!(report.program_state, ProgramState::Failed);
        assert!(host.controller().last_error().is_some());
        assert!((report.position[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[planner]\npool_size = 4\nreserve = 4").unwrap();
        assert!(config::load_config(file.path().to_str().unwrap()).is_err());
    }
}
