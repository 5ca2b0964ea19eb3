/*!
# SheetSearch

A browser-based search portal for a stone-processing factory's operational
data, built in Rust.

## Overview

The factory records block inventory, grinding, polishing, epoxy treatment and
dispatch data in a Google Sheets workbook. This service sits between the
browser and that workbook: it authenticates users, forwards search parameters
to the Sheets values API, filters and maps the returned rows into typed
records and serves them as JSON to the portal's filterable tables.

## Architecture

- **Row source** (`sheets`): one REST read per request against a fixed cell
  range of the workbook, with retry/backoff. The `User` tab doubles as the
  account store.
- **Search** (`search`, `records`): per-category pure filter/map logic —
  case-insensitive equality or substring matching on one to three key columns,
  positional mapping of the remaining columns into named string fields.
- **Auth** (`login`): Argon2id password hashing, UUID session cookies held in
  an in-process map, email OTP flows for registration and password reset.
- **HTTP** (`app`, `error`): axum router, session middleware, static portal
  shell, uniform JSON error bodies.

## REST API Endpoints

- `GET /api/search?blockNo=&partNo=&thickness=` - Main block search (Data1)
- `GET /api/dis-report?blockNo=&thickness=` - Dispatch report (Data2)
- `GET /api/dis-rpt?blockNo=&partNo=&thickness=` - Dispatch summary (Data3)
- `GET /api/grind?...` / `GET /api/polish?...` - Work logs (Grind/Polish)
- `GET /api/epoxy?...` - Epoxy treatment log (Epoxy)
- `GET /api/ecol?factoryColor=&subColor=&type=` - Colour search (Epoxy)
- `POST /api/register`, `/api/verify-otp`, `/api/login`, `/api/logout`,
  `/api/forgot-password`, `/api/forgot-username`, `/api/reset-password`
  and `GET /api/user` - Account lifecycle

Data endpoints require a valid session cookie and answer 401 otherwise.
*/

pub mod app;
pub mod config;
pub mod error;
pub mod login;
pub mod mailer;
pub mod records;
pub mod search;
pub mod sheets;
