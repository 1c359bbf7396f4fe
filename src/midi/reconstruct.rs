// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashMap;

use tracing::{debug, warn};

use super::decoder::{DecodedFile, EventKind};
use super::{Note, Track, TracksData};

/// A note event routed to a reconstruction bucket.
struct NoteEvent {
    tick: u64,
    pitch: u8,
    velocity: u8,
    note_on: bool,
}

/// Rebuilds the per-track note timeline from the decoded event stream.
/// Pairing anomalies are logged and never fail the reconstruction.
pub fn reconstruct(file: &DecodedFile) -> TracksData {
    // One entry per declared (track, channel) pair, behind the reserved
    // fallback bucket at index 0.
    let mut tracks = vec![Track {
        name: String::new(),
        channel: 0,
        track_index: 0,
        instrument_id: -1,
        note_count: 0,
        notes: Vec::new(),
    }];
    let mut entry_for: HashMap<(usize, u8), usize> = HashMap::new();
    let mut entries_for_channel: HashMap<u8, Vec<usize>> = HashMap::new();

    for info in &file.track_infos {
        for &channel in &info.channels {
            tracks.push(Track {
                name: info.name.clone(),
                channel,
                track_index: info.index,
                instrument_id: -1,
                note_count: 0,
                notes: Vec::new(),
            });
            let entry = tracks.len() - 1;
            entry_for.insert((info.index, channel), entry);
            entries_for_channel.entry(channel).or_default().push(entry);
        }
    }

    // Single pass: note events land in their entry's bucket, program changes
    // set the instrument of every entry on the channel, and timing meta is
    // only observed.
    let mut buckets: Vec<Vec<NoteEvent>> = (0..tracks.len()).map(|_| Vec::new()).collect();
    for event in &file.events {
        match event.kind {
            EventKind::NoteOn {
                channel,
                pitch,
                velocity,
            } => {
                let entry = entry_for.get(&(event.track, channel)).copied().unwrap_or(0);
                buckets[entry].push(NoteEvent {
                    tick: event.tick,
                    pitch,
                    velocity,
                    note_on: true,
                });
            }
            EventKind::NoteOff { channel, pitch } => {
                let entry = entry_for.get(&(event.track, channel)).copied().unwrap_or(0);
                buckets[entry].push(NoteEvent {
                    tick: event.tick,
                    pitch,
                    velocity: 0,
                    note_on: false,
                });
            }
            EventKind::ProgramChange { channel, program } => {
                if let Some(entries) = entries_for_channel.get(&channel) {
                    for &entry in entries {
                        tracks[entry].instrument_id = i32::from(program);
                    }
                }
            }
            EventKind::Tempo { micros_per_beat } => {
                debug!(micros_per_beat, "Tempo change.");
            }
            EventKind::TimeSignature {
                numerator,
                denominator,
            } => {
                debug!(numerator, denominator, "Time signature.");
            }
        }
    }

    for (index, bucket) in buckets.into_iter().enumerate() {
        let mut on_events = Vec::new();
        let mut off_events = Vec::new();
        for event in bucket {
            // A note on with any audible velocity starts a note. Everything
            // else, including the running-status "note on at velocity zero"
            // convention, ends one.
            if event.note_on && event.velocity > 0 {
                on_events.push(event);
            } else {
                off_events.push(event);
            }
        }

        if on_events.len() != off_events.len() {
            warn!(
                track = index,
                note_ons = on_events.len(),
                note_offs = off_events.len(),
                "Note on and note off counts do not match."
            );
        }

        // Pair each note on with the earliest remaining note off of the same
        // pitch at a strictly later tick.
        for on in on_events {
            let matched = off_events
                .iter()
                .position(|off| off.pitch == on.pitch && off.tick > on.tick);
            match matched {
                Some(position) => {
                    let off = off_events.remove(position);
                    let start = on.tick as f64 * file.micros_per_tick / 1000.0;
                    let end = off.tick as f64 * file.micros_per_tick / 1000.0;
                    tracks[index].notes.push(Note {
                        pitch: on.pitch,
                        start_micros: start,
                        duration_micros: end - start,
                        velocity: f32::from(on.velocity) / 127.0,
                    });
                }
                None => {
                    warn!(
                        track = index,
                        pitch = on.pitch,
                        tick = on.tick,
                        "Note on without a later matching note off, dropping."
                    );
                }
            }
        }
        tracks[index].note_count = tracks[index].notes.len();
    }

    TracksData { tracks }
}
