use std::time::Duration;

use tokio::io::{split, ReadHalf, WriteHalf};
use tokio::time::sleep;
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};

/// Opens the controller's serial port and pulses DTR to reset it, the way
/// Arduino-style boards expect. The caller should wait for the welcome banner
/// before streaming.
pub async fn open_serial(
    path: &str,
    baud: u32,
) -> tokio_serial::Result<(ReadHalf<SerialStream>, WriteHalf<SerialStream>)> {
    let mut port = tokio_serial::new(path, baud)
        .data_bits(DataBits::Eight)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(30))
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .open_native_async()?;
    port.write_data_terminal_ready(false)?;
    sleep(Duration::from_millis(2)).await;
    port.write_data_terminal_ready(true)?;
    Ok(split(port))
}
