#![no_main]
#![no_std]
#![feature(never_type)]

use bms_mainboard as _;

#[rtic::app(
    device = stm32g4xx_hal::stm32,
    dispatchers = [USBWAKEUP, COMP1_2_3, COMP4_5_6, COMP7, SAI, I2C4_EV, I2C4_ER]
)]
mod app {
    use bms_mainboard::balancer::Balancer;
    use bms_mainboard::can_comm::{self, CanNetwork, TxDedup};
    use bms_mainboard::can_queue;
    use bms_mainboard::conf::CELLBOARD_COUNT;
    use bms_mainboard::current::CurrentSensor;
    use bms_mainboard::dbc::pcan;
    use bms_mainboard::error::ErrorTable;
    use bms_mainboard::feedback::Feedback;
    use bms_mainboard::fsm::{Event, Fsm, FsmContext, State};
    use bms_mainboard::hardware;
    use bms_mainboard::hardware::{BmsCan, FeedbackIo, InternalVoltageIo, Mono, PrimaryCan};
    use bms_mainboard::identity::{CellboardVersion, Identity, MainboardVersion};
    use bms_mainboard::imd::{Imd, ImdStatus};
    use bms_mainboard::internal_voltage::InternalVoltage;
    use bms_mainboard::pcu::Pcu;
    use bms_mainboard::post;
    use bms_mainboard::programmer::{FlashTarget, Programmer};
    use bms_mainboard::scheduler::TaskId;
    use bms_mainboard::temperature::TemperatureAggregator;
    use bms_mainboard::timebase::Timebase;
    use bms_mainboard::units::{Celsius, Milliamps, Millivolts, Ticks};
    use bms_mainboard::voltage::VoltageAggregator;
    use bms_mainboard::watchdog::{Watchdog, WatchdogId};
    use defmt::Debug2Format;
    use embedded_can::Frame;
    use fugit::ExtU32;
    use rtic::Mutex;
    use rtic_monotonics::Monotonic;

    /// Everything the FSM drives or queries other than the raw contactor
    /// pins, bundled so the step task can hand out one borrow per tick.
    #[shared]
    struct Shared {
        fsm: Fsm,
        timebase: Timebase,
        errors: ErrorTable,
        voltages: VoltageAggregator,
        temperatures: TemperatureAggregator,
        current: CurrentSensor,
        internal_voltage: InternalVoltage,
        balancer: Balancer,
        programmer: Programmer,
        identity: Identity,
        imd: Imd,
        feedback: Feedback,
        tx_dedup: TxDedup,
        primary_tx: can_queue::Tx<PrimaryCan>,
        bms_tx: can_queue::Tx<BmsCan>,
    }

    #[local]
    struct Local {
        pcu: Pcu,
        pcu_pins: hardware::BoardPcuPins,
        feedback_io: hardware::BoardFeedbackIo,
        internal_voltage_io: hardware::BoardInternalVoltageIo,
        primary_can_control: can_queue::Control<PrimaryCan>,
        primary_rx: can_queue::Rx,
        bms_can_control: can_queue::Control<BmsCan>,
        bms_rx: can_queue::Rx,
    }

    /// Borrows every collaborator the FSM steps through for the duration of
    /// one `Fsm::step` call.
    struct Ctx<'a> {
        pcu: &'a mut Pcu,
        pins: &'a mut hardware::BoardPcuPins,
        timebase: &'a mut Timebase,
        balancer: &'a mut Balancer,
        programmer: &'a mut Programmer,
        feedback: &'a Feedback,
        internal_voltage: &'a InternalVoltage,
        voltages: &'a VoltageAggregator,
        errors: &'a ErrorTable,
        can_ready: bool,
        feedback_ready: bool,
    }

    impl FsmContext for Ctx<'_> {
        fn pcu_airn_close(&mut self) {
            self.pcu.airn_close(self.pins, self.timebase);
        }
        fn pcu_precharge_start(&mut self) {
            self.pcu.precharge_start(self.pins, self.timebase);
        }
        fn pcu_airp_close(&mut self) {
            self.pcu.airp_close(self.pins, self.timebase);
        }
        fn pcu_reset_all(&mut self) {
            self.pcu.reset_all(self.pins, self.timebase);
        }
        fn balancer_start(&mut self) {
            self.balancer.start(self.timebase);
        }
        fn balancer_stop(&mut self) {
            self.balancer.stop(self.timebase);
        }
        fn precharge_complete(&self) -> bool {
            self.internal_voltage.precharge_complete()
        }
        fn ts_voltage_consistent(&self) -> bool {
            self.internal_voltage.consistent_with_cells(self.voltages.pack_sum())
        }
        fn feedback(&self) -> &Feedback {
            self.feedback
        }
        fn programmer_arm(&mut self) {
            self.programmer.request(FlashTarget::Mainboard, self.timebase);
        }
        fn programmer_all_ready(&self) -> bool {
            self.programmer.all_ready()
        }
        fn system_reset(&mut self) -> ! {
            defmt::error!("system reset requested");
            cortex_m::peripheral::SCB::sys_reset()
        }
        fn run_post(&mut self) -> bool {
            struct Checks {
                can_ready: bool,
                feedback_ready: bool,
            }
            impl post::PostChecks for Checks {
                fn can_bus_ready(&self) -> bool {
                    self.can_ready
                }
                fn feedback_acquisition_ready(&self) -> bool {
                    self.feedback_ready
                }
            }
            post::run(&Checks {
                can_ready: self.can_ready,
                feedback_ready: self.feedback_ready,
            }) == post::PostResult::Ok
        }
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        defmt::info!("bms-mainboard init");

        let hardware::Board {
            primary_can_config,
            bms_can_config,
            can_timing_1mbps,
            pcu_pins,
            feedback_io,
            internal_voltage_io,
        } = hardware::init(cx.core, cx.device);

        let (primary_can_control, primary_rx, primary_tx) =
            can_queue::Control::init(primary_can_config, &can_timing_1mbps);
        let (bms_can_control, bms_rx, bms_tx) =
            can_queue::Control::init(bms_can_config, &can_timing_1mbps);

        let watchdogs = [
            Watchdog::new(WatchdogId::PcuAirNegative, bms_mainboard::conf::PCU_AIRN_TIMEOUT, Event::AirnTimeout),
            Watchdog::new(WatchdogId::PcuPrecharge, bms_mainboard::conf::PCU_PRECHARGE_TIMEOUT, Event::PrechargeTimeout),
            Watchdog::new(WatchdogId::PcuAirPositive, bms_mainboard::conf::PCU_AIRP_TIMEOUT, Event::AirpTimeout),
            Watchdog::new(WatchdogId::Balancer, bms_mainboard::conf::BALANCER_WATCHDOG_TIMEOUT, Event::BalancingStop),
            Watchdog::new(WatchdogId::Programmer, bms_mainboard::conf::PROGRAMMER_READY_TIMEOUT, Event::ProgrammerTimeout),
        ];
        let mut timebase = Timebase::new(bms_mainboard::conf::TICK_RESOLUTION_MS, watchdogs);
        timebase.set_enable(true);

        let identity = Identity::new(MainboardVersion {
            build_unix_time: env!("BMS_BUILD_UNIX_TIME", "0").parse().unwrap_or(0),
            component_version: 1,
            canlib_version: 1,
        });

        primary_rx_task::spawn().unwrap();
        bms_rx_task::spawn().unwrap();
        tick::spawn().unwrap();
        log_info::spawn().unwrap();

        (
            Shared {
                fsm: Fsm::new(),
                timebase,
                errors: ErrorTable::new(),
                voltages: VoltageAggregator::new(),
                temperatures: TemperatureAggregator::new(),
                current: CurrentSensor::new(),
                internal_voltage: InternalVoltage::new(),
                balancer: Balancer::new(),
                programmer: Programmer::new(),
                identity,
                imd: Imd::new(),
                feedback: Feedback::new(),
                tx_dedup: TxDedup::new(),
                primary_tx,
                bms_tx,
            },
            Local {
                pcu: Pcu::new(),
                pcu_pins,
                feedback_io,
                internal_voltage_io,
                primary_can_control,
                primary_rx,
                bms_can_control,
                bms_rx,
            },
        )
    }

    /// One tick per `TICK_RESOLUTION_MS`: advances the timebase, dispatches
    /// due periodic tasks, advances error-table expiry and steps the FSM.
    #[task(
        local = [pcu, pcu_pins, feedback_io, internal_voltage_io],
        shared = [fsm, timebase, errors, voltages, temperatures, current, internal_voltage,
                  balancer, programmer, identity, imd, feedback, tx_dedup, primary_tx, bms_tx],
        priority = 4,
    )]
    async fn tick(cx: tick::Context) {
        let tick::SharedResources {
            mut fsm,
            mut timebase,
            mut errors,
            mut voltages,
            mut temperatures,
            mut current,
            mut internal_voltage,
            mut balancer,
            mut programmer,
            mut identity,
            mut imd,
            mut feedback,
            mut tx_dedup,
            mut primary_tx,
            mut bms_tx,
            ..
        } = cx.shared;
        let pcu = cx.local.pcu;
        let pins = cx.local.pcu_pins;
        let feedback_io = cx.local.feedback_io;
        let internal_voltage_io = cx.local.internal_voltage_io;
        let mut feedback_ready = false;

        let period = (bms_mainboard::conf::TICK_RESOLUTION_MS as u32).millis();
        let mut next = Mono::now() + period;
        loop {
            Mono::delay_until(next).await;
            next += period;

            let (due_tasks, watchdog_events) = timebase.lock(|tb| {
                tb.inc_tick();
                tb.routine().unwrap_or_default()
            });
            errors.lock(|e| e.routine(timebase.lock(|tb| tb.get_tick())));

            for event in watchdog_events {
                match event {
                    Event::BalancingStop => balancer.lock(|b| b.watchdog_expired()),
                    Event::ProgrammerTimeout => programmer.lock(|p| p.watchdog_expired()),
                    _ => {}
                }
                fsm.lock(|f| f.notify(event));
            }

            (
                &mut timebase,
                &mut balancer,
                &mut programmer,
                &mut feedback,
                &mut internal_voltage,
                &mut voltages,
                &mut errors,
            )
                .lock(|timebase, balancer, programmer, feedback, internal_voltage, voltages, errors| {
                    let any_expired = errors.any_expired();
                    let step_tick = timebase.get_tick();
                    let mut ctx = Ctx {
                        pcu,
                        pins,
                        timebase,
                        balancer,
                        programmer,
                        feedback,
                        internal_voltage,
                        voltages,
                        errors,
                        can_ready: true,
                        feedback_ready,
                    };
                    if any_expired {
                        fsm.lock(|f| f.notify(Event::TsOff));
                    }
                    fsm.lock(|f| f.step(&mut ctx, step_tick));
                });

            for task_id in due_tasks {
                dispatch(
                    task_id,
                    &mut primary_tx,
                    &mut bms_tx,
                    &mut tx_dedup,
                    &mut identity,
                    &mut imd,
                    &mut current,
                    &mut internal_voltage,
                    &mut voltages,
                    &mut temperatures,
                    &mut errors,
                    &mut balancer,
                    &mut fsm,
                    &mut feedback,
                    feedback_io,
                    internal_voltage_io,
                    &mut feedback_ready,
                );
            }
        }
    }

    fn fsm_state_code(state: State) -> u8 {
        match state {
            State::Init => 0,
            State::Idle => 1,
            State::AirnCheck => 2,
            State::Precharge => 3,
            State::AirpCheck => 4,
            State::TsOn => 5,
            State::Flash => 6,
            State::Fatal => 7,
        }
    }

    fn imd_status_code(status: ImdStatus) -> u8 {
        match status {
            ImdStatus::Unknown => 0,
            ImdStatus::ShortCircuit => 1,
            ImdStatus::Normal => 2,
            ImdStatus::UnderVoltage => 3,
            ImdStatus::StartMeasure => 4,
            ImdStatus::DeviceError => 5,
            ImdStatus::EarthFault => 6,
        }
    }

    /// Builds and enqueues the telemetry frame (or runs the hardware
    /// acquisition step) for one due task.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        task_id: TaskId,
        primary_tx: &mut impl Mutex<T = can_queue::Tx<PrimaryCan>>,
        bms_tx: &mut impl Mutex<T = can_queue::Tx<BmsCan>>,
        tx_dedup: &mut impl Mutex<T = TxDedup>,
        identity: &mut impl Mutex<T = Identity>,
        imd: &mut impl Mutex<T = Imd>,
        current: &mut impl Mutex<T = CurrentSensor>,
        internal_voltage: &mut impl Mutex<T = InternalVoltage>,
        voltages: &mut impl Mutex<T = VoltageAggregator>,
        temperatures: &mut impl Mutex<T = TemperatureAggregator>,
        errors: &mut impl Mutex<T = ErrorTable>,
        balancer: &mut impl Mutex<T = Balancer>,
        fsm: &mut impl Mutex<T = Fsm>,
        feedback: &mut impl Mutex<T = Feedback>,
        feedback_io: &mut hardware::BoardFeedbackIo,
        internal_voltage_io: &mut hardware::BoardInternalVoltageIo,
        feedback_ready: &mut bool,
    ) {
        match task_id {
            TaskId::SendMainboardVersion => {
                let v = identity.lock(|i| i.mainboard_version());
                let msg = pcan::HvMainboardVersion::new(v.component_version, v.canlib_version).unwrap();
                primary_tx.lock(|tx| tx.transmit(&msg));
            }
            TaskId::SendCellboardVersion(_) => {
                // Reported by cellboards, not sent by the mainboard.
            }
            TaskId::SendStatus => {
                let state = fsm.lock(|f| f.state());
                let post_result = if state == State::Fatal { 1 } else { 0 };
                let msg = pcan::HvStatus::new(fsm_state_code(state), post_result).unwrap();
                primary_tx.lock(|tx| tx.transmit(&msg));
            }
            TaskId::SendBalancingStatus => {
                let (active, threshold, target) =
                    balancer.lock(|b| (b.is_active(), b.threshold(), b.target()));
                let msg =
                    pcan::HvBalancingStatus::new(active as u8, threshold as u8, target as u16).unwrap();
                primary_tx.lock(|tx| tx.transmit(&msg));
            }
            TaskId::SendCurrent => {
                let ma = current.lock(|c| c.value());
                let msg = pcan::HvCurrent::new(ma).unwrap();
                primary_tx.lock(|tx| tx.transmit(&msg));
            }
            TaskId::SendPower => {
                let ma = current.lock(|c| c.value());
                let ts_mv = internal_voltage.lock(|iv| iv.ts_voltage());
                let power_w = ((ma as i64 * ts_mv as i64) / 1_000_000) as i32;
                let msg = pcan::HvPower::new(power_w).unwrap();
                primary_tx.lock(|tx| tx.transmit(&msg));
            }
            TaskId::SendTsVoltage => {
                let pack_sum = voltages.lock(|v| v.pack_sum());
                let (ts, pack, heatsink, consistent) = internal_voltage.lock(|iv| {
                    (
                        iv.ts_voltage(),
                        iv.pack_voltage(),
                        iv.precharge_heatsink_temp(),
                        iv.consistent_with_cells(pack_sum),
                    )
                });
                let msg = pcan::HvTsVoltage::new(ts as u32, pack as u32, heatsink as i8, consistent)
                    .unwrap();
                primary_tx.lock(|tx| tx.transmit(&msg));
            }
            TaskId::SendCellsVoltage => {
                for board in 0..CELLBOARD_COUNT as u8 {
                    for group in 0..4u8 {
                        let offset = group * 3;
                        let (v0, v1, v2) = voltages.lock(|v| {
                            (
                                v.cell(board, offset) as u16,
                                v.cell(board, offset + 1) as u16,
                                v.cell(board, offset + 2) as u16,
                            )
                        });
                        let msg = pcan::HvCellsVoltage::new(board, offset, v0, v1, v2).unwrap();
                        primary_tx.lock(|tx| tx.transmit(&msg));
                    }
                }
            }
            TaskId::SendFeedbackStatus => {
                let (ok, flags) = feedback.lock(|fb| (fb.all_ok(), fb.latched_flags()));
                let msg = pcan::HvFeedbackStatus::new(ok as u8, flags).unwrap();
                primary_tx.lock(|tx| tx.transmit(&msg));
            }
            TaskId::SendFeedbackDigital => {
                let bits = feedback.lock(|fb| fb.digital_bits());
                let msg = pcan::HvFeedbackDigital::new(bits).unwrap();
                primary_tx.lock(|tx| tx.transmit(&msg));
            }
            TaskId::SendFeedbackAnalog => {
                for channel in 0..10u8 {
                    let raw = feedback.lock(|fb| fb.analog_raw(channel));
                    let msg = pcan::HvFeedbackAnalog::new(channel, raw).unwrap();
                    primary_tx.lock(|tx| tx.transmit(&msg));
                }
            }
            TaskId::SendFeedbackAnalogSd => {
                for channel in [6u8, 7, 8] {
                    let raw = feedback.lock(|fb| fb.analog_raw(channel));
                    let msg = pcan::HvFeedbackAnalogSd::new(channel, raw).unwrap();
                    primary_tx.lock(|tx| tx.transmit(&msg));
                }
            }
            TaskId::SendImdStatus => {
                let (status, frequency, duty_cycle) =
                    imd.lock(|i| (i.status(), i.frequency(), i.duty_cycle()));
                let msg = pcan::HvImdStatus::new(
                    imd_status_code(status),
                    frequency as u16,
                    duty_cycle,
                )
                .unwrap();
                primary_tx.lock(|tx| tx.transmit(&msg));
            }
            TaskId::SendCellboardSetBalancingStatus => {
                for board in 0..CELLBOARD_COUNT as u8 {
                    let cmd = balancer.lock(|b| b.board_command(board));
                    if tx_dedup.lock(|d| d.try_begin(CanNetwork::Bms, board)) {
                        bms_tx.lock(|tx| match board {
                            0 => tx.transmit(&pcan::CellboardSetBalancingStatus0::new(cmd.mask).unwrap()),
                            1 => tx.transmit(&pcan::CellboardSetBalancingStatus1::new(cmd.mask).unwrap()),
                            2 => tx.transmit(&pcan::CellboardSetBalancingStatus2::new(cmd.mask).unwrap()),
                            3 => tx.transmit(&pcan::CellboardSetBalancingStatus3::new(cmd.mask).unwrap()),
                            4 => tx.transmit(&pcan::CellboardSetBalancingStatus4::new(cmd.mask).unwrap()),
                            _ => tx.transmit(&pcan::CellboardSetBalancingStatus5::new(cmd.mask).unwrap()),
                        });
                        tx_dedup.lock(|d| d.complete(CanNetwork::Bms, board));
                    }
                }
            }
            TaskId::ReadDigitalFeedbacks => {
                let bits = feedback_io.read_digital();
                feedback.lock(|fb| fb.update_digital_all(bits as u32));
            }
            TaskId::StartAnalogConversionFeedbacks => {
                feedback_io.start_analog_conversion();
            }
            TaskId::UpdateFeedbacksStatus => {
                feedback.lock(|fb| fb.update_status());
                *feedback_ready = true;
            }
            TaskId::StartInternalVoltageConversion => {
                let (ts, pack, heatsink, imd_ts_connected) = internal_voltage_io.read();
                internal_voltage.lock(|iv| iv.update(ts, pack, heatsink, imd_ts_connected));
            }
        }
        let _ = errors;
        let _ = temperatures;
    }

    fn apply_cellboard_version(
        identity: &mut impl Mutex<T = Identity>,
        board: u8,
        component_version: u8,
        canlib_version: u8,
    ) {
        identity.lock(|i| {
            i.handle_cellboard_version(board, CellboardVersion { component_version, canlib_version })
        });
    }

    fn apply_cellboard_ready(programmer: &mut impl Mutex<T = Programmer>, board: u8, ready: bool) {
        programmer.lock(|p| p.handle_cellboard_ready(board, ready));
    }

    fn apply_cell_voltages(
        voltages: &mut impl Mutex<T = VoltageAggregator>,
        errors: &mut impl Mutex<T = ErrorTable>,
        board: u8,
        offset: u8,
        now: Ticks,
        values: [Millivolts; 3],
    ) {
        (voltages, errors).lock(|v, e| {
            for (i, value) in values.into_iter().enumerate() {
                v.update(board, offset + i as u8, value, now, e);
            }
        });
    }

    fn apply_cell_temperatures(
        temperatures: &mut impl Mutex<T = TemperatureAggregator>,
        errors: &mut impl Mutex<T = ErrorTable>,
        board: u8,
        offset: u8,
        now: Ticks,
        values: [Celsius; 4],
    ) {
        (temperatures, errors).lock(|t, e| {
            for (i, value) in values.into_iter().enumerate() {
                t.update(board, offset + i as u8, value, now, e);
            }
        });
    }

    fn apply_current(
        current: &mut impl Mutex<T = CurrentSensor>,
        errors: &mut impl Mutex<T = ErrorTable>,
        now: Ticks,
        value: Milliamps,
    ) {
        (current, errors).lock(|c, e| c.update(value, now, e));
    }

    #[task(
        local = [primary_rx],
        shared = [voltages, errors, timebase, balancer, programmer, fsm],
        priority = 2,
    )]
    async fn primary_rx_task(mut cx: primary_rx_task::Context) {
        loop {
            let frame = cx.local.primary_rx.recv().await.unwrap();
            let now = cx.shared.timebase.lock(|tb| tb.get_tick());
            let msg = pcan::Messages::from_can_message(frame.id(), frame.data());
            let msg = match msg {
                Err(_) => {
                    cx.shared
                        .errors
                        .lock(|e| can_comm::record_outcome(e, CanNetwork::Primary, false, now));
                    defmt::error!("primary rx: unparsed frame {:?}", Debug2Format(&frame.id()));
                    continue;
                }
                Ok(msg) => {
                    cx.shared
                        .errors
                        .lock(|e| can_comm::record_outcome(e, CanNetwork::Primary, true, now));
                    msg
                }
            };

            match msg {
                pcan::Messages::HvTsCommand(m) => {
                    let event = if m.enable() != 0 { Event::TsOn } else { Event::TsOff };
                    cx.shared.fsm.lock(|f| f.notify(event));
                }
                pcan::Messages::HvBalancingCommand(m) => {
                    let enable = m.enable() != 0;
                    let threshold = m.threshold_mv() as Millivolts;
                    let target = m.target_mv() as Millivolts;
                    (&mut cx.shared.voltages, &mut cx.shared.balancer, &mut cx.shared.timebase).lock(
                        |voltages, balancer, timebase| {
                            if enable {
                                if balancer.handle_command(threshold, target, voltages).is_ok() {
                                    balancer.start(timebase);
                                }
                            } else {
                                balancer.stop(timebase);
                            }
                        },
                    );
                    let event = if enable { Event::BalancingStart } else { Event::BalancingStop };
                    cx.shared.fsm.lock(|f| f.notify(event));
                }
                pcan::Messages::HvFlashRequest(m) => {
                    let target = if m.target_kind() == 0 {
                        FlashTarget::Mainboard
                    } else {
                        FlashTarget::Cellboard(m.cellboard_id())
                    };
                    (&mut cx.shared.programmer, &mut cx.shared.timebase)
                        .lock(|programmer, timebase| programmer.request(target, timebase));
                    cx.shared.fsm.lock(|f| f.notify(Event::FlashRequest));
                }
                pcan::Messages::HvFlash(m) => {
                    (&mut cx.shared.programmer, &mut cx.shared.timebase)
                        .lock(|programmer, timebase| programmer.handle_flash(m.start() != 0, timebase));
                }
                other => defmt::trace!("primary rx: ignoring {:?}", Debug2Format(&other)),
            }
        }
    }

    #[task(
        local = [bms_rx],
        shared = [voltages, temperatures, current, errors, timebase, identity, programmer],
        priority = 2,
    )]
    async fn bms_rx_task(mut cx: bms_rx_task::Context) {
        loop {
            let frame = cx.local.bms_rx.recv().await.unwrap();
            let now = cx.shared.timebase.lock(|tb| tb.get_tick());
            let msg = pcan::Messages::from_can_message(frame.id(), frame.data());
            let msg = match msg {
                Err(_) => {
                    cx.shared
                        .errors
                        .lock(|e| can_comm::record_outcome(e, CanNetwork::Bms, false, now));
                    defmt::error!("bms rx: unparsed frame {:?}", Debug2Format(&frame.id()));
                    continue;
                }
                Ok(msg) => {
                    cx.shared
                        .errors
                        .lock(|e| can_comm::record_outcome(e, CanNetwork::Bms, true, now));
                    msg
                }
            };

            match msg {
                pcan::Messages::CellboardVersion0(m) => {
                    apply_cellboard_version(&mut cx.shared.identity, 0, m.component_version(), m.canlib_version())
                }
                pcan::Messages::CellboardVersion1(m) => {
                    apply_cellboard_version(&mut cx.shared.identity, 1, m.component_version(), m.canlib_version())
                }
                pcan::Messages::CellboardVersion2(m) => {
                    apply_cellboard_version(&mut cx.shared.identity, 2, m.component_version(), m.canlib_version())
                }
                pcan::Messages::CellboardVersion3(m) => {
                    apply_cellboard_version(&mut cx.shared.identity, 3, m.component_version(), m.canlib_version())
                }
                pcan::Messages::CellboardVersion4(m) => {
                    apply_cellboard_version(&mut cx.shared.identity, 4, m.component_version(), m.canlib_version())
                }
                pcan::Messages::CellboardVersion5(m) => {
                    apply_cellboard_version(&mut cx.shared.identity, 5, m.component_version(), m.canlib_version())
                }

                pcan::Messages::CellboardStatus0(m) => apply_cellboard_ready(&mut cx.shared.programmer, 0, m.ready() != 0),
                pcan::Messages::CellboardStatus1(m) => apply_cellboard_ready(&mut cx.shared.programmer, 1, m.ready() != 0),
                pcan::Messages::CellboardStatus2(m) => apply_cellboard_ready(&mut cx.shared.programmer, 2, m.ready() != 0),
                pcan::Messages::CellboardStatus3(m) => apply_cellboard_ready(&mut cx.shared.programmer, 3, m.ready() != 0),
                pcan::Messages::CellboardStatus4(m) => apply_cellboard_ready(&mut cx.shared.programmer, 4, m.ready() != 0),
                pcan::Messages::CellboardStatus5(m) => apply_cellboard_ready(&mut cx.shared.programmer, 5, m.ready() != 0),

                pcan::Messages::CellboardCellsVoltage0(m) => apply_cell_voltages(
                    &mut cx.shared.voltages, &mut cx.shared.errors, 0, m.cell_offset(), now,
                    [m.voltage_0_mv() as Millivolts, m.voltage_1_mv() as Millivolts, m.voltage_2_mv() as Millivolts],
                ),
                pcan::Messages::CellboardCellsVoltage1(m) => apply_cell_voltages(
                    &mut cx.shared.voltages, &mut cx.shared.errors, 1, m.cell_offset(), now,
                    [m.voltage_0_mv() as Millivolts, m.voltage_1_mv() as Millivolts, m.voltage_2_mv() as Millivolts],
                ),
                pcan::Messages::CellboardCellsVoltage2(m) => apply_cell_voltages(
                    &mut cx.shared.voltages, &mut cx.shared.errors, 2, m.cell_offset(), now,
                    [m.voltage_0_mv() as Millivolts, m.voltage_1_mv() as Millivolts, m.voltage_2_mv() as Millivolts],
                ),
                pcan::Messages::CellboardCellsVoltage3(m) => apply_cell_voltages(
                    &mut cx.shared.voltages, &mut cx.shared.errors, 3, m.cell_offset(), now,
                    [m.voltage_0_mv() as Millivolts, m.voltage_1_mv() as Millivolts, m.voltage_2_mv() as Millivolts],
                ),
                pcan::Messages::CellboardCellsVoltage4(m) => apply_cell_voltages(
                    &mut cx.shared.voltages, &mut cx.shared.errors, 4, m.cell_offset(), now,
                    [m.voltage_0_mv() as Millivolts, m.voltage_1_mv() as Millivolts, m.voltage_2_mv() as Millivolts],
                ),
                pcan::Messages::CellboardCellsVoltage5(m) => apply_cell_voltages(
                    &mut cx.shared.voltages, &mut cx.shared.errors, 5, m.cell_offset(), now,
                    [m.voltage_0_mv() as Millivolts, m.voltage_1_mv() as Millivolts, m.voltage_2_mv() as Millivolts],
                ),

                pcan::Messages::CellboardCellsTemperature0(m) => apply_cell_temperatures(
                    &mut cx.shared.temperatures, &mut cx.shared.errors, 0, m.temp_offset(), now,
                    [m.temp_0_c() as Celsius, m.temp_1_c() as Celsius, m.temp_2_c() as Celsius, m.temp_3_c() as Celsius],
                ),
                pcan::Messages::CellboardCellsTemperature1(m) => apply_cell_temperatures(
                    &mut cx.shared.temperatures, &mut cx.shared.errors, 1, m.temp_offset(), now,
                    [m.temp_0_c() as Celsius, m.temp_1_c() as Celsius, m.temp_2_c() as Celsius, m.temp_3_c() as Celsius],
                ),
                pcan::Messages::CellboardCellsTemperature2(m) => apply_cell_temperatures(
                    &mut cx.shared.temperatures, &mut cx.shared.errors, 2, m.temp_offset(), now,
                    [m.temp_0_c() as Celsius, m.temp_1_c() as Celsius, m.temp_2_c() as Celsius, m.temp_3_c() as Celsius],
                ),
                pcan::Messages::CellboardCellsTemperature3(m) => apply_cell_temperatures(
                    &mut cx.shared.temperatures, &mut cx.shared.errors, 3, m.temp_offset(), now,
                    [m.temp_0_c() as Celsius, m.temp_1_c() as Celsius, m.temp_2_c() as Celsius, m.temp_3_c() as Celsius],
                ),
                pcan::Messages::CellboardCellsTemperature4(m) => apply_cell_temperatures(
                    &mut cx.shared.temperatures, &mut cx.shared.errors, 4, m.temp_offset(), now,
                    [m.temp_0_c() as Celsius, m.temp_1_c() as Celsius, m.temp_2_c() as Celsius, m.temp_3_c() as Celsius],
                ),
                pcan::Messages::CellboardCellsTemperature5(m) => apply_cell_temperatures(
                    &mut cx.shared.temperatures, &mut cx.shared.errors, 5, m.temp_offset(), now,
                    [m.temp_0_c() as Celsius, m.temp_1_c() as Celsius, m.temp_2_c() as Celsius, m.temp_3_c() as Celsius],
                ),

                pcan::Messages::CellboardFlashResponse0(m) => {
                    defmt::trace!("bms rx: cellboard 0 flash ack {}", m.ack())
                }
                pcan::Messages::CellboardFlashResponse1(m) => {
                    defmt::trace!("bms rx: cellboard 1 flash ack {}", m.ack())
                }
                pcan::Messages::CellboardFlashResponse2(m) => {
                    defmt::trace!("bms rx: cellboard 2 flash ack {}", m.ack())
                }
                pcan::Messages::CellboardFlashResponse3(m) => {
                    defmt::trace!("bms rx: cellboard 3 flash ack {}", m.ack())
                }
                pcan::Messages::CellboardFlashResponse4(m) => {
                    defmt::trace!("bms rx: cellboard 4 flash ack {}", m.ack())
                }
                pcan::Messages::CellboardFlashResponse5(m) => {
                    defmt::trace!("bms rx: cellboard 5 flash ack {}", m.ack())
                }

                pcan::Messages::IvtCurrent(m) => {
                    apply_current(&mut cx.shared.current, &mut cx.shared.errors, now, m.current_ma())
                }

                other => defmt::trace!("bms rx: ignoring {:?}", Debug2Format(&other)),
            }
        }
    }

    #[task(binds = FDCAN1_INTR1_IT, shared = [primary_tx], local = [primary_can_control], priority = 6)]
    fn primary_can_irq(cx: primary_can_irq::Context) {
        cx.local.primary_can_control.on_irq(cx.shared.primary_tx);
    }

    #[task(binds = FDCAN2_INTR1_IT, shared = [bms_tx], local = [bms_can_control], priority = 6)]
    fn bms_can_irq(cx: bms_can_irq::Context) {
        cx.local.bms_can_control.on_irq(cx.shared.bms_tx);
    }

    #[task(shared = [fsm, errors], priority = 0)]
    async fn log_info(mut cx: log_info::Context) {
        loop {
            Mono::delay(2.secs()).await;
            let state = cx.shared.fsm.lock(|f| f.state());
            let (running, expired) = cx.shared.errors.lock(|e| e.group_counts(bms_mainboard::error::ErrorGroup::OverCurrent));
            defmt::info!("fsm: {:?} over-current errors running {} expired {}", state, running, expired);
        }
    }
}
