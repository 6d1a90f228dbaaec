// mackey_glass.rs
//! Integrates the Mackey–Glass equation from a constant past and prints
//! `t y` pairs every 10 time units.
use anyhow::Result;
use solve_dde::{DdeIntegrator, DdeSystem, Delay, DiscontinuityOptions, IntegrationParameters};

const TAU: f64 = 15.0;
const N: i32 = 10;
const BETA: f64 = 0.25;
const GAMMA: f64 = 0.1;

fn main() -> Result<()> {
    let rhs = DdeSystem::new(1, vec![TAU], |_t, y, past, dydt| {
        let lagged = past.component(Delay::Lag(TAU), 0, 0)?;
        dydt[0] = BETA * lagged / (1.0 + lagged.powi(N)) - GAMMA * y[0];
        Ok(())
    });

    let mut dde = DdeIntegrator::new(rhs, IntegrationParameters::default())?;
    dde.add_past_point(-1.0, &[1.0], &[0.0])?;
    dde.add_past_point(0.0, &[1.0], &[0.0])?;

    let start = dde.step_on_discontinuities(&DiscontinuityOptions::default())?;

    for k in 0..1000 {
        let t = start + 10.0 * k as f64;
        let y = dde.integrate(t)?;
        println!("{} {}", t, y[0]);
    }

    let stats = dde.statistics();
    eprintln!(
        "{} accepted, {} rejected, {} evaluations",
        stats.naccpt, stats.nrejct, stats.nfev
    );
    Ok(())
}
