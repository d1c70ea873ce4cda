//! Run the LED fixture: four pots on AIN0–AIN3 drive the white, green, blue and
//! red LED strings on the EHRPWM outputs.
//!
//! Needs root for `/dev/mem` and the sysfs PWM class.

use core::convert::Infallible;

use clap::Parser;
use embassy_executor::Spawner;
use env_logger::Env;
use led_fixture::{
    Result,
    adc::Adc,
    channel::Channel,
    config::{Args, Config},
    controller::Controller,
    duty::PWM_PERIOD,
    pwm::SysfsPwm,
    random::XorShift32,
    registers::MappedRegion,
};
use log::{error, info};

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_micros()
        .init();

    let err = match inner_main(&args).await {
        Ok(never) => match never {},
        Err(err) => err,
    };
    error!("{err}");
    std::process::exit(1);
}

async fn inner_main(args: &Args) -> Result<Infallible> {
    let config = args.validate()?;
    info!("starting with {config:?}");

    let pwms = open_pwms(&config).await?;
    let adc = Adc::initialize(
        MappedRegion::open()?,
        config.divider,
        config.average,
        &Channel::INPUTS,
    )?;

    let mut controller = Controller::new(adc, pwms, config.window, XorShift32::from_time())?;
    let err = match controller.run(config.sleep).await {
        Ok(never) => match never {},
        Err(err) => err,
    };
    // Best effort: the loop error is the one worth reporting.
    if let Err(shutdown_err) = controller.shutdown() {
        error!("ADC shutdown failed: {shutdown_err}");
    }
    Err(err)
}

async fn open_pwms(config: &Config) -> Result<[SysfsPwm; 4]> {
    let open = |channel: Channel| {
        let location = config.pwm[channel.index()];
        info!("{channel} LEDs on {} via pwmchip {location}", channel.pwm_pin());
        SysfsPwm::open(&config.pwm_root, location, PWM_PERIOD)
    };
    Ok([
        open(Channel::White).await?,
        open(Channel::Green).await?,
        open(Channel::Blue).await?,
        open(Channel::Red).await?,
    ])
}
