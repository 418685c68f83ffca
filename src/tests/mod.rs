
mod archive_fidelity;
mod patch_scenarios;
mod resolver_cases;
mod synth_cases;
