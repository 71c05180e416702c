#![cfg(test)]

use serial_test::serial;

use tt_burnin::board::{Board, BoardKind, Host};
use tt_burnin::luwen_host::LuwenHost;
use tt_burnin::workload::{WorkloadLibrary, WorkloadSettings};


fn host() -> LuwenHost {
    LuwenHost::new(WorkloadLibrary::default(), WorkloadSettings::default())
}

#[serial]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(
        not(feature = "test_hardware"),
        ignore = "Requires real hardware"
    )]
    fn test_enumerate_describes_every_board() {
        if !test_utils::hardware_available() {
            return;
        }

        let boards = host().enumerate().unwrap();
        assert!(!boards.is_empty(), "Should find at least one board");

        for (position, board) in boards.iter().enumerate() {
            let descriptor = board.descriptor();
            println!(
                "Board {}: {} {} pci {} serial {}",
                descriptor.index,
                descriptor.kind,
                descriptor.board_type,
                descriptor.pci_id(),
                descriptor.board_number()
            );
            assert_eq!(descriptor.index, position);
            assert!(!descriptor.board_type.is_empty());
            if descriptor.interface.is_none() {
                assert_eq!(descriptor.kind, BoardKind::Wormhole, "only wormhole has remote chips");
            }
        }
    }

    #[test]
    #[cfg_attr(
        not(all(feature = "test_hardware", feature = "test_wormhole")),
        ignore = "Requires real wormhole hardware"
    )]
    fn wormhole_test_idle_telemetry() {
        if !test_utils::hardware_available() {
            return;
        }

        for board in host().enumerate().unwrap() {
            if board.descriptor().kind != BoardKind::Wormhole {
                continue;
            }
            let sample = board.sample().unwrap();
            println!("Board {}: {sample:?}", board.descriptor().index);

            assert!(sample.voltage.value > 0.0 && sample.voltage.max > 0.0);
            assert!(sample.aiclk.value > 0.0);
            assert!(sample.temperature.value > 0.0 && sample.temperature.value < 150.0);
        }
    }

    #[test]
    #[cfg_attr(
        not(all(feature = "test_hardware", feature = "test_blackhole")),
        ignore = "Requires real blackhole hardware"
    )]
    fn blackhole_test_idle_telemetry() {
        if !test_utils::hardware_available() {
            return;
        }

        for board in host().enumerate().unwrap() {
            if board.descriptor().kind != BoardKind::Blackhole {
                continue;
            }
            let sample = board.sample().unwrap();
            println!("Board {}: {sample:?}", board.descriptor().index);

            assert!(sample.power.max > 0.0);
            assert!(sample.temperature.value > 0.0 && sample.temperature.value < 150.0);
        }
    }
}
