use std::{env, fs, path::PathBuf, process::Command};

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "[simulation]\n"
        + "ticks_per_run = 720\n"
        + "ticks_between_runs = 24\n"
        + "seed = 3\n"
        + "\n"
        + "[city]\n"
        + "length = 25\n"
        + "width = 25\n"
        + "\n"
        + "[population]\n"
        + "susceptible_count = 60\n"
        + "exposed_count = 3\n"
        + "immunosuppressed_share = 0.05\n"
        + "smokers_share = 0.2\n"
        + "alcohol_drinkers_share = 0.1\n"
        + "locations = [\n"
        + "  { household = [ 2.0, 3.0,], workplace = [ 12.0, 12.5,] },\n"
        + "  { household = [ 20.5, 4.0,], workplace = [ 12.0, 12.5,] },\n"
        + "  { household = [ 7.0, 18.0,], workplace = [ 5.5, 6.0,] },\n"
        + "]\n"
        + "\n"
        + "[model]\n"
        + "average_room_volume = 40.0\n"
        + "\n"
        + "[model.initial]\n"
        + "average_room_ventilation_rate = 3.0\n"
        + "infection_probability = 0.3\n"
        + "mean_diagnosis_delay = 20.0\n"
        + "treatment_dropout_rate = 0.1\n"
        + "\n"
        + "[calibration]\n"
        + "epsilon = 0.5\n"
        + "learning_rate = 0.1\n"
        + "discount_factor = 0.8\n"
        + "just_noticeable_difference = 0.001\n"
        + "updates_before_swap = 2\n"
        + "simulations_per_step = 2\n"
        + "max_steps = 4\n"
        + "incidence_rate_goal = 0.05\n"
        + "exposure_rate_goal = 0.3\n"
        + "aggregate = \"mean\"\n"
        + "objective = \"pareto\"\n"
        + "\n"
        + "[[calibration.parameters]]\n"
        + "id = \"infectionProbability\"\n"
        + "tolerance = 0.1\n"
        + "lower_bound = 0.0\n"
        + "upper_bound = 1.0\n"
        + "\n"
        + "[[calibration.parameters]]\n"
        + "id = \"averageRoomVentilationRate\"\n"
        + "tolerance = 0.125\n"
        + "lower_bound = 1.0\n"
        + "upper_bound = 5.0\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    fn run_bin(args: &[&str]) -> bool {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_tubabm"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

        if !output.status.success() {
            eprintln!("failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n");
        }
        output.status.success()
    }

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--sim-dir", test_dir_str, "simulate", "--runs", "3"]));
    assert!(run_bin(&["--sim-dir", test_dir_str, "--seed", "11", "simulate"]));

    assert!(run_bin(&["--sim-dir", test_dir_str, "calibrate"]));

    // An unknown parameter id aborts startup.
    let bad_contents = fs::read_to_string(&config_path)
        .expect("failed to read config file")
        .replace("\"averageRoomVentilationRate\"", "\"roomTemperature\"");
    fs::write(&config_path, bad_contents).expect("failed to write config file");
    assert!(!run_bin(&["--sim-dir", test_dir_str, "calibrate"]));

    fs::remove_dir_all(&test_dir).ok();
}
