use simple_logger::SimpleLogger;
use sourcemeter::{
    resistance::{self, SanityGates},
    session::Session,
    sweep::{self, StepDelay, SweepMode, SweepParameters},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable logging
    SimpleLogger::new().init()?;

    // Connect to the SourceMeter named on the command line, or a default one.
    let resource = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "TCPIP::10.42.0.60::INSTR".to_string());
    let mut session = Session::open(&resource)?;
    println!("Connected to {}", session.identity());

    // Sweep a few millivolts in both directions with four-wire sensing,
    // trading accuracy for speed.
    let mut params = SweepParameters::voltage(-0.003, 0.003, 101);
    params
        .limit(0.05)
        .step_delay(StepDelay::Auto)
        .four_wire(true)
        .auto_zero(false)
        .nplc(0.01)
        .readback(false)
        .mode(SweepMode::ResistanceProbe);
    let result = sweep::run(&mut session, &params)?;
    println!(
        "Captured {} samples in {} ms",
        result.samples(),
        result.elapsed().as_millis()
    );

    let gates = SanityGates::default();
    let estimate = resistance::estimate(result.forward(), params.source_function(), &gates)?;
    println!("Forward: {estimate}");
    if let Some(reverse) = result.reverse() {
        let estimate = resistance::estimate(reverse, params.source_function(), &gates)?;
        println!("Reverse: {estimate}");
    }

    // Turns the output off.
    session.close()?;
    Ok(())
}
