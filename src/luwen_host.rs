// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! [`Host`] and [`Board`] backed by the luwen driver library.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use luwen::api::chip::{ArcMsgOptions, Chip, HlComms, Telemetry};
use luwen::api::{ArcMsg, ArcMsgOk, ChipImpl, TypedArcMsg};
use luwen::def::Arch;
use luwen::reset::{reset_chips, ResetOptions};
use tracing::{debug, info, warn};

use crate::board::{Board, BoardDescriptor, BoardKind, Host, MeshCoord, Reading, TelemetrySample};
use crate::error::{BoardError, BoardOp, BurninError};
use crate::reset::{ResetOutcome, ResetPlan};
use crate::workload::cores::{self, CoreCoord};
use crate::workload::{self, TensixTarget, WorkloadImage, WorkloadLibrary, WorkloadSettings};

const NOC0: u8 = 0;

impl BoardKind {
    #[allow(deprecated)]
    pub fn from_arch(arch: Arch) -> Option<Self> {
        if arch.is_wormhole() {
            Some(BoardKind::Wormhole)
        } else if arch.is_blackhole() {
            Some(BoardKind::Blackhole)
        } else if arch.is_grayskull() {
            Some(BoardKind::Grayskull)
        } else {
            None
        }
    }
}

/// Turn the raw telemetry words into value / limit pairs.
pub fn decode_telemetry(telemetry: &Telemetry) -> TelemetrySample {
    let low = |word: u32| (word & 0xFFFF) as f64;
    let high = |word: u32| (word >> 16) as f64;

    TelemetrySample {
        voltage: Reading::new(
            telemetry.vcore as f64 / 1000.0,
            high(telemetry.vdd_limits) / 1000.0,
        ),
        current: Reading::new(low(telemetry.tdc), high(telemetry.tdc)),
        aiclk: Reading::new(low(telemetry.aiclk), high(telemetry.aiclk)),
        power: Reading::new(low(telemetry.tdp), high(telemetry.tdp)),
        temperature: Reading::new(telemetry.asic_temperature(), low(telemetry.thm_limits)),
    }
}

pub struct LuwenHost {
    library: WorkloadLibrary,
    settings: WorkloadSettings,
    images: Mutex<HashMap<BoardKind, Result<Arc<WorkloadImage>, String>>>,
}

impl LuwenHost {
    pub fn new(library: WorkloadLibrary, settings: WorkloadSettings) -> Self {
        Self {
            library,
            settings,
            images: Mutex::new(HashMap::new()),
        }
    }

    /// Images are decoded the first time a kind shows up and shared after that.
    fn image_for(&self, kind: BoardKind) -> Result<Arc<WorkloadImage>, String> {
        let mut images = self.images.lock().unwrap_or_else(|e| e.into_inner());
        images
            .entry(kind)
            .or_insert_with(|| {
                let bundle = self.library.bundle_path(kind);
                match WorkloadImage::load(&bundle) {
                    Ok(image) => {
                        info!(
                            "Loaded {kind} workload from {} ({} chunks)",
                            bundle.display(),
                            image.chunks.len()
                        );
                        Ok(Arc::new(image))
                    }
                    Err(e) => {
                        warn!("Could not load the {kind} workload: {e}");
                        Err(e.to_string())
                    }
                }
            })
            .clone()
    }
}

fn describe(index: usize, kind: BoardKind, chip: &Chip) -> BoardDescriptor {
    let interface = match chip.get_device_info() {
        Ok(info) => info.map(|info| info.interface_id as usize),
        Err(e) => {
            debug!(board = index, "No device info: {e}");
            None
        }
    };

    let (mut board_type, serial) = match chip.get_telemetry() {
        Ok(telemetry) => (telemetry.board_type().to_string(), telemetry.board_id),
        Err(e) => {
            warn!(board = index, "Failed to read telemetry while enumerating: {e}");
            ("UNKNOWN".to_string(), 0)
        }
    };

    let mut coord = None;
    if let Some(wh) = chip.as_wh() {
        board_type.push_str(if wh.is_remote { " R" } else { " L" });
        coord = wh.get_local_chip_coord().ok().map(|addr| MeshCoord {
            shelf_x: addr.shelf_x,
            shelf_y: addr.shelf_y,
            rack_x: addr.rack_x,
            rack_y: addr.rack_y,
        });
    }

    BoardDescriptor {
        index,
        interface,
        kind,
        board_type,
        serial,
        coord,
    }
}

impl Host for LuwenHost {
    type Board = LuwenBoard;

    fn enumerate(&self) -> Result<Vec<LuwenBoard>, BurninError> {
        let detected = luwen::pci::detect_chips_fallible()
            .map_err(|e| BurninError::Enumeration(e.to_string()))?;

        let mut boards = Vec::with_capacity(detected.len());
        for chip in detected {
            let chip = match chip.init(&mut |_| Ok::<(), Infallible>(())) {
                Ok(chip) => chip,
                Err(e) => {
                    warn!("Skipping a chip that did not initialize: {e:?}");
                    continue;
                }
            };

            let index = boards.len();
            let Some(kind) = BoardKind::from_arch(chip.get_arch()) else {
                warn!(board = index, "Skipping chip with unknown architecture");
                continue;
            };

            let descriptor = describe(index, kind, &chip);
            let image = match kind {
                BoardKind::Grayskull => Err("unsupported board kind".to_string()),
                _ => self.image_for(kind),
            };
            debug!(board = index, interface = ?descriptor.interface, "Found {kind} board");

            boards.push(LuwenBoard {
                descriptor,
                chip,
                image,
                settings: self.settings,
            });
        }

        Ok(boards)
    }

    fn reset(&self, plan: &ResetPlan) -> Result<ResetOutcome, BurninError> {
        let options = ResetOptions {
            timeout: plan.timeout,
            pcie_link_reset: true,
            restore_state: plan.reinit,
            interfaces: plan.interfaces(),
        };
        let result = reset_chips(options).map_err(|e| BurninError::ResetFailed(e.to_string()))?;

        Ok(ResetOutcome {
            reset: result.successful,
            failed: result
                .failed
                .into_iter()
                .map(|(interface, e)| (interface, e.to_string()))
                .collect(),
            appeared: result.new_interfaces,
            vanished: result.missing_interfaces,
        })
    }
}

pub struct LuwenBoard {
    descriptor: BoardDescriptor,
    chip: Chip,
    image: Result<Arc<WorkloadImage>, String>,
    settings: WorkloadSettings,
}

impl LuwenBoard {
    fn tensix(&self) -> Tensix<'_> {
        Tensix {
            chip: &self.chip,
            kind: self.descriptor.kind,
            remote: self.chip.as_wh().map(|wh| wh.is_remote).unwrap_or(false),
            cores: RefCell::new(None),
        }
    }

    fn supported(&self) -> Result<(), BoardError> {
        match self.descriptor.kind {
            BoardKind::Grayskull => Err(BoardError::Unsupported {
                index: self.descriptor.index,
                kind: self.descriptor.kind,
            }),
            _ => Ok(()),
        }
    }
}

impl Board for LuwenBoard {
    fn descriptor(&self) -> &BoardDescriptor {
        &self.descriptor
    }

    fn start_workload(&self) -> Result<(), BoardError> {
        self.supported()?;
        let index = self.descriptor.index;
        let image = self
            .image
            .as_ref()
            .map_err(|message| BoardError::MissingWorkload {
                index,
                kind: self.descriptor.kind,
                message: message.clone(),
            })?;

        workload::start(&self.tensix(), image, self.settings)
            .map_err(|e| BoardError::failed(index, BoardOp::Start, e.to_string()))
    }

    fn stop_workload(&self) -> Result<(), BoardError> {
        self.supported()?;
        workload::stop(&self.tensix())
            .map_err(|e| BoardError::failed(self.descriptor.index, BoardOp::Stop, e.to_string()))
    }

    fn sample(&self) -> Result<TelemetrySample, BoardError> {
        self.chip
            .get_telemetry()
            .map(|telemetry| decode_telemetry(&telemetry))
            .map_err(|e| BoardError::failed(self.descriptor.index, BoardOp::Sample, e.to_string()))
    }
}

/// The tensix grid of one chip, as seen by the workload sequence.
struct Tensix<'a> {
    chip: &'a Chip,
    kind: BoardKind,
    /// Chips behind ethernet cannot broadcast.
    remote: bool,
    cores: RefCell<Option<BTreeSet<CoreCoord>>>,
}

impl Tensix<'_> {
    fn harvesting(&self) -> Result<u32, String> {
        let reply = self
            .chip
            .arc_msg(ArcMsgOptions {
                msg: ArcMsg::Typed(TypedArcMsg::GetHarvesting),
                ..Default::default()
            })
            .map_err(|e| e.to_string())?;
        match reply {
            ArcMsgOk::Ok { arg, .. } => Ok(arg),
            _ => Err("ARC did not report the harvesting mask".to_string()),
        }
    }

    fn for_each_core(
        &self,
        mut write: impl FnMut(CoreCoord) -> Result<(), Box<dyn std::error::Error>>,
    ) -> Result<(), String> {
        for core in self.tensix_cores()? {
            write(core).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

impl TensixTarget for Tensix<'_> {
    type Error = String;

    fn broadcast32(&self, addr: u64, value: u32) -> Result<(), String> {
        if self.remote {
            self.for_each_core(|(x, y)| self.chip.noc_write32(NOC0, x, y, addr, value))
        } else {
            self.chip
                .noc_broadcast32(NOC0, addr, value)
                .map_err(|e| e.to_string())
        }
    }

    fn broadcast(&self, addr: u64, data: &[u8]) -> Result<(), String> {
        if self.remote {
            self.for_each_core(|(x, y)| self.chip.noc_write(NOC0, x, y, addr, data))
        } else {
            self.chip
                .noc_broadcast(NOC0, addr, data)
                .map_err(|e| e.to_string())
        }
    }

    fn read(&self, (x, y): CoreCoord, addr: u64, data: &mut [u8]) -> Result<(), String> {
        self.chip
            .noc_read(NOC0, x, y, addr, data)
            .map_err(|e| e.to_string())
    }

    fn arc_msg(&self, msg: u32) -> Result<(), String> {
        self.chip
            .arc_msg(ArcMsgOptions {
                msg: ArcMsg::Raw {
                    msg: msg as _,
                    arg0: 0,
                    arg1: 0,
                },
                ..Default::default()
            })
            .map(|_| ())
            .map_err(|e| format!("ARC message {msg:#x} failed: {e}"))
    }

    fn tensix_cores(&self) -> Result<BTreeSet<CoreCoord>, String> {
        if let Some(cores) = self.cores.borrow().as_ref() {
            return Ok(cores.clone());
        }

        let found = match self.kind {
            BoardKind::Wormhole => cores::wormhole_tensix_cores(self.harvesting()?),
            BoardKind::Blackhole => {
                let telemetry = self.chip.get_telemetry().map_err(|e| e.to_string())?;
                cores::blackhole_tensix_cores(
                    telemetry.tensix_enabled_col,
                    telemetry.noc_translation_enabled,
                )
            }
            BoardKind::Grayskull => return Err("unsupported board kind".to_string()),
        };
        *self.cores.borrow_mut() = Some(found.clone());
        Ok(found)
    }
}
